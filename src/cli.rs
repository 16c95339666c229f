use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Reference recording to follow (WAV)
    #[arg(value_name = "REFERENCE_WAV")]
    pub reference: String,

    /// Performance input WAV; omit to capture from the microphone
    #[arg(long)]
    pub input: Option<String>,

    /// Page-end frame indices, comma separated (e.g. "40,70")
    #[arg(long)]
    pub pages: Option<String>,

    /// Split the score into this many equal pages when --pages is not given
    #[arg(long, default_value_t = 2)]
    pub num_pages: usize,

    /// Path to config TOML
    #[arg(long, default_value = "segue.toml")]
    pub config: String,

    /// Pace a WAV input at the live capture cadence
    #[arg(long, default_value_t = false)]
    pub realtime: bool,
}
