use crate::tvm::{
    BocOptions, TopologicalOrder, boc_to_base64, boc_to_hex, fift, parse_boc_any,
};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::time::Instant;

/// tonutils-boc CLI
#[derive(Parser, Debug)]
#[command(name = "tonutils-boc")]
#[command(about = "Inspect and convert TON bags of cells", long_about = None)]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the roots of a BoC (hex, base64 or Fift text) as Fift trees
    Decode {
        /// BoC input, or "-" to read it from stdin
        input: String,
    },
    /// Serialize Fift hex text into a BoC
    Encode {
        /// Fift text, or "-" to read it from stdin
        input: String,
        /// Print base64 instead of hex
        #[arg(long)]
        base64: bool,
        #[command(flatten)]
        options: BocArgs,
    },
    /// Print the representation hash of every root
    Hash {
        /// BoC input, or "-" to read it from stdin
        input: String,
    },
}

/// Serialization flags mapped onto [`BocOptions`]
#[derive(Args, Debug, Clone, Default)]
pub struct BocArgs {
    /// Write the per-cell offset index
    #[arg(long)]
    pub index: bool,
    /// Omit the CRC32C checksum
    #[arg(long)]
    pub no_crc: bool,
    /// Reserve cache bits in the index
    #[arg(long)]
    pub cache_bits: bool,
    /// Lay cells out depth-first instead of breadth-first
    #[arg(long)]
    pub depth_first: bool,
    /// Reserved user flag bits (0-3)
    #[arg(long, default_value_t = 0)]
    pub flags: u8,
    /// Base options as JSON; the flags above override it
    #[arg(long)]
    pub options: Option<String>,
}

impl BocArgs {
    /// Resolves the command line flags into serialization options
    pub fn to_options(&self) -> Result<BocOptions> {
        let mut options = match &self.options {
            Some(json) => BocOptions::from_json(json).context("Failed to parse --options")?,
            None => BocOptions::default(),
        };

        if self.index {
            options.has_index = true;
        }
        if self.no_crc {
            options.has_crc32 = false;
        }
        if self.cache_bits {
            options.has_cache_bits = true;
        }
        if self.depth_first {
            options.topological_order = TopologicalOrder::DepthFirst;
        }
        if self.flags != 0 {
            options.flags = self.flags;
        }

        Ok(options)
    }
}

fn read_input(input: &str) -> Result<String> {
    if input != "-" {
        return Ok(input.to_string());
    }

    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read input from stdin")?;
    Ok(buffer)
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Execute the command
    pub fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Decode { input } => self.execute_decode(&read_input(input)?),
            Commands::Encode {
                input,
                base64,
                options,
            } => self.execute_encode(&read_input(input)?, *base64, options),
            Commands::Hash { input } => self.execute_hash(&read_input(input)?),
        }
    }

    fn execute_decode(&self, input: &str) -> Result<()> {
        let start = Instant::now();
        let roots = parse_boc_any(input).context("Failed to decode BoC")?;
        log::debug!("Decoded in {:.3}s", start.elapsed().as_secs_f64());

        log::info!("BoC holds {} root(s)", roots.len());
        for (i, root) in roots.iter().enumerate() {
            println!("root {}: {}", i, root.hash_hex());
            print!("{}", root.to_fift_hex());
        }
        Ok(())
    }

    fn execute_encode(&self, input: &str, base64: bool, args: &BocArgs) -> Result<()> {
        let options = args.to_options()?;
        let roots = fift::parse(input).context("Failed to parse Fift hex")?;
        if roots.len() != 1 {
            bail!("Expected exactly one root cell, got {}", roots.len());
        }

        log::debug!("Serializing with {:?}", options);
        let encoded = if base64 {
            boc_to_base64(&roots[0], &options)?
        } else {
            boc_to_hex(&roots[0], &options)?
        };
        println!("{}", encoded);
        Ok(())
    }

    fn execute_hash(&self, input: &str) -> Result<()> {
        let roots = parse_boc_any(input).context("Failed to decode BoC")?;
        for root in roots {
            println!("{}", root.hash_hex());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encode_command() {
        let cli = Cli::try_parse_from([
            "tonutils-boc",
            "encode",
            "x{FF}",
            "--index",
            "--no-crc",
            "--depth-first",
        ])
        .unwrap();

        let Commands::Encode { options, base64, .. } = cli.command else {
            panic!("expected encode command");
        };
        assert!(!base64);

        let options = options.to_options().unwrap();
        assert!(options.has_index);
        assert!(!options.has_crc32);
        assert_eq!(options.topological_order, TopologicalOrder::DepthFirst);
    }

    #[test]
    fn test_verbose_flag_counts() {
        let cli = Cli::try_parse_from(["tonutils-boc", "hash", "-vv", "x{FF}"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Hash { .. }));
    }

    #[test]
    fn test_json_options_are_overridden() {
        let args = BocArgs {
            options: Some(r#"{"has_cache_bits": true, "flags": 2}"#.to_string()),
            no_crc: true,
            ..BocArgs::default()
        };
        let options = args.to_options().unwrap();
        assert!(options.has_cache_bits);
        assert!(!options.has_crc32);
        assert_eq!(options.flags, 2);
    }

    #[test]
    fn test_bad_json_options() {
        let args = BocArgs {
            options: Some("not json".to_string()),
            ..BocArgs::default()
        };
        assert!(args.to_options().is_err());
    }
}
