use clap::Parser;

use biblioscan::cli::{self, Cli, Commands};
use biblioscan::{server, Config};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = Config::new();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => actix_web::rt::System::new().block_on(server::run(config))?,
        Commands::Detect { image, conf, iou } => cli::handle_detect(&config, &image, conf, iou)?,
        Commands::Scan {
            image,
            conf,
            iou,
            agent,
        } => cli::handle_scan(&config, &image, conf, iou, agent)?,
    }
    Ok(())
}
