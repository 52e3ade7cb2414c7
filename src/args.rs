use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about = "QuickBooks data passthrough web application", long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = String::from(""), help = "The log directory e.g. '/var/logs'. If this is not provided, only logs out to stdout.")]
    pub base_log_dir: String,

    #[arg(long, env = "QB_CLIENT_ID", help = "QuickBooks OAuth2 Client ID")]
    pub client_id: String,

    #[arg(long, env = "QB_CLIENT_SECRET", help = "QuickBooks OAuth2 Client Secret")]
    pub client_secret: String,

    #[arg(
        long,
        env = "QB_REDIRECT_URI",
        help = "OAuth2 callback URL registered with Intuit e.g. \"https://example.com/callback\""
    )]
    pub redirect_uri: String,

    #[arg(
        long,
        env = "QB_SANDBOX",
        default_value_t = false,
        action = clap::ArgAction::Set,
        help = "Query the QuickBooks sandbox company API instead of production"
    )]
    pub sandbox: bool,

    #[arg(
        long,
        env = "SECRET_KEY",
        help = "Key material for signing and encrypting session cookies. Must be at least 64 bytes."
    )]
    pub secret_key: String,

    #[arg(long, env = "PORT", default_value_t = 5000u32)]
    pub port: u32,

    #[arg(
        long,
        default_value_t = 30u64,
        help = "Timeout in seconds applied to every upstream QuickBooks call"
    )]
    pub upstream_timeout: u64,
}

pub fn parse_args() -> Args {
    return Args::parse();
}
