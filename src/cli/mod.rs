use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    #[arg(short, long, default_value_t = String::from("fleet.json"))]
    config: String,

    #[arg(long)]
    print_debug_info: bool,
}

impl Cli {
    /// Parses command line arguments
    pub fn init_fleet_cli() -> Self {
        Self::parse()
    }

    pub fn get_config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }

    pub fn print_debug_info(&self) -> bool {
        self.print_debug_info
    }
}
