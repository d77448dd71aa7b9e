//! Configuration
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! has an env-var alias so deployments can configure the daemon without a
//! wrapper script.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Warden - moderation list daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "warden")]
#[command(about = "Watches the firehose and keeps moderation lists in sync")]
#[command(version)]
pub struct Cli {
    /// Credentials file (YAML with `id` and `pass`)
    #[arg(long, env = "WARDEN_CREDENTIALS", default_value = "creds.yaml", global = true)]
    pub credentials: PathBuf,

    /// Directory holding cache.db, word lists, and exception files
    #[arg(long, env = "WARDEN_DATA_DIR", default_value = ".", global = true)]
    pub data_dir: PathBuf,

    /// Authenticated API host (writes)
    #[arg(long, env = "API_HOST", default_value = "bsky.social", global = true)]
    pub api_host: String,

    /// Public API host (anonymous reads)
    #[arg(long, env = "PUBLIC_API_HOST", default_value = "public.api.bsky.app", global = true)]
    pub public_api_host: String,

    /// Firehose host (repo event stream)
    #[arg(
        long,
        env = "FIREHOSE_HOST",
        default_value = "jetstream1.us-east.bsky.network",
        global = true
    )]
    pub firehose_host: String,

    /// Handle suffix marking an account as unverified
    #[arg(long, env = "DEFAULT_DOMAIN", default_value = ".bsky.social", global = true)]
    pub default_domain: String,

    /// Scheduler worker count
    #[arg(long, env = "NUM_SCHEDULERS", default_value = "2", global = true)]
    pub num_schedulers: usize,

    /// Resolver worker count
    #[arg(long, env = "NUM_RESOLVERS", default_value = "40", global = true)]
    pub num_resolvers: usize,

    /// Reconciler worker count
    #[arg(long, env = "NUM_RECONCILERS", default_value = "20", global = true)]
    pub num_reconcilers: usize,

    /// Cached profile lifetime in hours
    #[arg(long, env = "CACHE_HOURS", default_value = "1", global = true)]
    pub cache_hours: i64,

    /// Query-queue depth that triggers compaction
    #[arg(
        long,
        env = "COMPACTION_WATERMARK",
        default_value = "10530000",
        global = true
    )]
    pub compaction_watermark: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the daemon
    Run(RunArgs),

    /// Remove an account from one list
    RemoveUser {
        /// Handle of the account to remove
        #[arg(long)]
        user: String,

        /// Name of the list to remove it from
        #[arg(long)]
        list: String,
    },

    /// Delete a list entirely
    DeleteList {
        /// Name of the list to delete
        #[arg(long)]
        list: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Rescan every cached DID on startup (in addition to list members)
    #[arg(long)]
    pub cache: bool,

    /// Expire cached profiles after the cache lifetime (default)
    #[arg(long, overrides_with = "no_expire_cache")]
    pub expire_cache: bool,

    /// Treat every cached profile as fresh forever
    #[arg(long, overrides_with = "expire_cache")]
    pub no_expire_cache: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    /// Effective freshness switch: on unless `--no-expire-cache` won.
    pub fn cache_expire(&self) -> bool {
        !self.no_expire_cache
    }
}

impl Cli {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.num_schedulers == 0 || self.num_resolvers == 0 || self.num_reconcilers == 0 {
            return Err("worker counts must all be at least 1".to_string());
        }
        if self.cache_hours <= 0 {
            return Err("CACHE_HOURS must be positive".to_string());
        }
        if self.compaction_watermark == 0 {
            return Err("COMPACTION_WATERMARK must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_tuning() {
        let cli = Cli::parse_from(["warden", "run"]);
        assert_eq!(cli.num_schedulers, 2);
        assert_eq!(cli.num_resolvers, 40);
        assert_eq!(cli.num_reconcilers, 20);
        assert_eq!(cli.cache_hours, 1);
        assert_eq!(cli.compaction_watermark, 10_530_000);
        assert!(cli.validate().is_ok());

        let Command::Run(args) = cli.command else {
            panic!("expected run")
        };
        assert!(!args.cache);
        assert!(args.cache_expire());
        assert!(!args.verbose);
    }

    #[test]
    fn no_expire_cache_disables_freshness() {
        let cli = Cli::parse_from(["warden", "run", "--no-expire-cache"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run")
        };
        assert!(!args.cache_expire());
    }

    #[test]
    fn expire_cache_flag_is_accepted_explicitly() {
        let cli = Cli::parse_from(["warden", "run", "--expire-cache"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run")
        };
        assert!(args.cache_expire());
    }

    #[test]
    fn remove_user_requires_user_and_list() {
        assert!(Cli::try_parse_from(["warden", "remove-user", "--user", "a.bsky.social"]).is_err());
        let cli = Cli::parse_from([
            "warden",
            "remove-user",
            "--user",
            "a.bsky.social",
            "--list",
            "Following 5k+",
        ]);
        let Command::RemoveUser { user, list } = cli.command else {
            panic!("expected remove-user")
        };
        assert_eq!(user, "a.bsky.social");
        assert_eq!(list, "Following 5k+");
    }

    #[test]
    fn zero_workers_fail_validation() {
        let cli = Cli::parse_from(["warden", "--num-resolvers", "0", "run"]);
        assert!(cli.validate().is_err());
    }
}
