use clap::Parser;

/// CLI flags override their environment counterparts.
#[derive(Parser)]
#[command(name = "bgw", about = "OpenAI-compatible gateway for Bedrock Converse")]
pub(crate) struct Cli {
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
}
