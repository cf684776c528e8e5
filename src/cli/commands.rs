use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the data directory and database
    Init {
        /// Data directory for the database and user storage
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },

    /// Manage groups
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Add a group
    Add {
        /// Data directory for the database and user storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Group name (case-sensitive)
        #[arg(long)]
        name: String,

        /// Comma-separated login names
        #[arg(long, default_value = "")]
        members: String,

        /// Free-form description
        #[arg(long, default_value = "")]
        info: String,
    },

    /// Remove a group
    Remove {
        /// Data directory for the database and user storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Group name
        #[arg(long)]
        name: String,
    },

    /// Show or replace the members of a group
    Members {
        /// Data directory for the database and user storage
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Group name
        #[arg(long)]
        name: String,

        /// Replace the member list with these comma-separated login names
        #[arg(long)]
        set: Option<String>,
    },
}
