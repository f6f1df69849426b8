use clap::Parser;

use crate::zip::{OpenOptions, UnsafePathPolicy};

#[derive(Parser, Debug)]
#[command(name = "streamzip")]
#[command(version)]
#[command(about = "Streaming ZIP reader with HTTP Range support", long_about = None)]
#[command(after_help = "Examples:\n  \
  streamzip data1.zip -x joe        extract all files except joe from data1.zip\n  \
  streamzip -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  streamzip -P secret -d out a.zip  extract an encrypted archive into out/\n  \
  streamzip -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Password for encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Quiet mode
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Extra bytes added to each entry's first read window
    #[arg(long, value_name = "BYTES", default_value_t = OpenOptions::default().padding)]
    pub padding: u64,

    /// Bytes at the end of the file searched for the central directory trailer
    #[arg(long, value_name = "BYTES", default_value_t = OpenOptions::default().tail_size)]
    pub tail_size: u64,

    /// Do not look for a CRX prefix
    #[arg(long)]
    pub no_crx: bool,

    /// Entries extracted at the same time
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub concurrency: usize,

    /// Abort when an entry would be written outside the target directory
    #[arg(long)]
    pub strict_paths: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet || self.pipe
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions::default()
            .padding(self.padding)
            .tail_size(self.tail_size)
            .crx(!self.no_crx)
    }

    pub fn unsafe_path_policy(&self) -> UnsafePathPolicy {
        if self.strict_paths {
            UnsafePathPolicy::Fail
        } else {
            UnsafePathPolicy::Skip
        }
    }
}
