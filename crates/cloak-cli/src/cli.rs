use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cloak",
    about = "Keep a private file collection encrypted at rest",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to listing managed content.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List managed content.
    List {
        /// Print items as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Copy external files into managed storage.
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Delete managed items by name.
    Remove {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Encrypt managed items (original plaintext is removed).
    Encrypt(Selection),
    /// Decrypt managed items (encrypted originals are removed).
    Decrypt(Selection),
    /// Delete everything in managed storage.
    Wipe {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },
    /// Run an encrypt/decrypt round trip against the configured key.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Which items a batch command applies to.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Every item in the applicable state.
    #[arg(long, conflicts_with = "names")]
    pub all: bool,
    /// Item names as shown by `cloak list`.
    #[arg(required_unless_present = "all")]
    pub names: Vec<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_list_when_missing_subcommand() {
        let cli = Cli::try_parse_from(["cloak"]).expect("parse should succeed");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn parses_list_json() {
        let cli = Cli::try_parse_from(["cloak", "list", "--json"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::List { json: true }));
    }

    #[test]
    fn parses_add_paths() {
        let cli = Cli::try_parse_from(["cloak", "add", "a.jpg", "b.txt"]).expect("parse");
        assert_eq!(
            cli.command,
            Some(Command::Add {
                paths: vec![PathBuf::from("a.jpg"), PathBuf::from("b.txt")]
            })
        );
    }

    #[test]
    fn add_requires_a_path() {
        assert!(Cli::try_parse_from(["cloak", "add"]).is_err());
    }

    #[test]
    fn encrypt_accepts_all_or_names() {
        let all = Cli::try_parse_from(["cloak", "encrypt", "--all"]).expect("parse");
        assert_eq!(
            all.command,
            Some(Command::Encrypt(Selection {
                all: true,
                names: vec![]
            }))
        );

        let named = Cli::try_parse_from(["cloak", "decrypt", "a.txt.CRYPT"]).expect("parse");
        assert_eq!(
            named.command,
            Some(Command::Decrypt(Selection {
                all: false,
                names: vec!["a.txt.CRYPT".into()]
            }))
        );
    }

    #[test]
    fn selection_rejects_empty_and_conflicting_input() {
        assert!(Cli::try_parse_from(["cloak", "encrypt"]).is_err());
        assert!(Cli::try_parse_from(["cloak", "encrypt", "--all", "a.txt"]).is_err());
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["cloak", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Init)));
    }
}
