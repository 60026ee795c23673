use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::BuildConfig;

/// setupforge - Declarative installer manifest compiler
#[derive(Parser)]
#[command(name = "setupforge")]
#[command(about = "Compile installer manifests into validated, fully-resolved package descriptions")]
#[command(version)]
pub struct Cli {
    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a manifest and write the resolved package
    Compile {
        #[command(flatten)]
        build: BuildArgs,

        /// Previously emitted resolved package to check upgrade rules against
        #[arg(long, env = "SETUPFORGE_BASELINE")]
        baseline: Option<PathBuf>,

        /// Write the resolved JSON here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also write WiX source to this file
        #[arg(long)]
        wxs: Option<PathBuf>,
    },
    /// Check a manifest without writing anything
    Validate {
        #[command(flatten)]
        build: BuildArgs,

        /// Previously emitted resolved package to check upgrade rules against
        #[arg(long, env = "SETUPFORGE_BASELINE")]
        baseline: Option<PathBuf>,
    },
}

/// Manifest path and injected build values
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Path to the manifest JSON file
    pub manifest: PathBuf,

    /// Target platform (x86, x64)
    #[arg(long, env = "SETUPFORGE_PLATFORM")]
    pub platform: Option<String>,

    /// Product version (major.minor.build[.revision])
    #[arg(long = "version", id = "product_version", env = "SETUPFORGE_VERSION")]
    pub product_version: String,

    /// Build profile name
    #[arg(long, env = "SETUPFORGE_PROFILE", default_value = "release")]
    pub profile: String,

    /// Compiled application binary
    #[arg(long, env = "SETUPFORGE_BINARY")]
    pub binary: Option<PathBuf>,

    /// Product icon
    #[arg(long, env = "SETUPFORGE_ICON")]
    pub icon: Option<PathBuf>,

    /// License text (RTF)
    #[arg(long, env = "SETUPFORGE_LICENSE")]
    pub license: Option<PathBuf>,

    /// Installer banner bitmap
    #[arg(long, env = "SETUPFORGE_BANNER")]
    pub banner: Option<PathBuf>,

    /// Installer dialog background bitmap
    #[arg(long, env = "SETUPFORGE_DIALOG")]
    pub dialog: Option<PathBuf>,
}

impl BuildArgs {
    pub fn to_config(&self) -> BuildConfig {
        BuildConfig {
            platform: self.platform.clone(),
            version: self.product_version.clone(),
            profile: self.profile.clone(),
            binary: self.binary.clone(),
            icon: self.icon.clone(),
            license: self.license.clone(),
            banner: self.banner.clone(),
            dialog: self.dialog.clone(),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["setupforge"]).is_err());
    }

    #[test]
    fn test_cli_compile_command() {
        let cli = Cli::try_parse_from([
            "setupforge",
            "compile",
            "product.json",
            "--platform",
            "x64",
            "--version",
            "1.2.3",
            "--binary",
            "target/release/acme.exe",
            "--out",
            "resolved.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Compile {
                build, out, wxs, ..
            } => {
                assert_eq!(build.manifest, PathBuf::from("product.json"));
                assert_eq!(out, Some(PathBuf::from("resolved.json")));
                assert!(wxs.is_none());

                let config = build.to_config();
                assert_eq!(config.platform.as_deref(), Some("x64"));
                assert_eq!(config.version, "1.2.3");
                assert_eq!(config.profile, "release");
                assert_eq!(config.binary, Some(PathBuf::from("target/release/acme.exe")));
            }
            _ => panic!("Expected Compile command"),
        }
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::try_parse_from([
            "setupforge",
            "validate",
            "product.json",
            "--version",
            "2.0.0",
            "--profile",
            "debug",
        ])
        .unwrap();

        match cli.command {
            Commands::Validate { build, baseline } => {
                assert_eq!(build.profile, "debug");
                assert!(baseline.is_none());
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_cli_global_quiet_flag() {
        let cli = Cli::try_parse_from([
            "setupforge",
            "validate",
            "product.json",
            "--version",
            "1.0.0",
            "-q",
        ])
        .unwrap();
        assert!(cli.quiet);
    }
}
