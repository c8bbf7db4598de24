use clap::Subcommand;
use clap_handler::Handler;

mod download;

#[derive(Subcommand, Clone, Handler)]
pub enum KiraraCommand {
    Download(download::DownloadCommand),
}
