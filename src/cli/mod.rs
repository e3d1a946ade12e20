//! Command-line interface.

use clap::{Parser, Subcommand};

/// Aniways - anime catalog ingestion and enrichment
#[derive(Parser, Debug)]
#[command(name = "aniways")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP server, the scheduler and the database listeners
    #[command(alias = "d")]
    Daemon,

    /// Run one scraping pass
    Scrape {
        #[command(subcommand)]
        command: ScrapeCommands,
    },

    /// Library synchronisation with the list providers
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },

    /// OAuth token maintenance
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Print the admin key, creating it if absent
    AdminKey,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ScrapeCommands {
    /// First pages of the recently updated listing
    RecentlyUpdated,

    /// A-Z listing followed by the whole recently updated listing
    FullSeed,

    /// Whole recently updated listing, oldest page first
    AllRecentlyUpdated,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum LibraryCommands {
    /// Re-dispatch pending and failed library syncs
    RetryFailed,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum AuthCommands {
    /// Refresh MyAnimeList tokens close to expiry
    RefreshTokens,
}

impl Cli {
    /// No subcommand means daemon mode.
    #[must_use]
    pub fn command(self) -> Commands {
        self.command.unwrap_or(Commands::Daemon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("aniways").chain(args.iter().copied()))
            .unwrap()
            .command()
    }

    #[test]
    fn defaults_to_daemon() {
        assert_eq!(parse(&[]), Commands::Daemon);
        assert_eq!(parse(&["d"]), Commands::Daemon);
    }

    #[test]
    fn parses_nested_commands() {
        assert_eq!(
            parse(&["scrape", "all-recently-updated"]),
            Commands::Scrape {
                command: ScrapeCommands::AllRecentlyUpdated
            }
        );
        assert_eq!(
            parse(&["library", "retry-failed"]),
            Commands::Library {
                command: LibraryCommands::RetryFailed
            }
        );
        assert_eq!(
            parse(&["auth", "refresh-tokens"]),
            Commands::Auth {
                command: AuthCommands::RefreshTokens
            }
        );
        assert_eq!(parse(&["admin-key"]), Commands::AdminKey);
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(Cli::try_parse_from(["aniways", "scrape", "everything"]).is_err());
    }
}
