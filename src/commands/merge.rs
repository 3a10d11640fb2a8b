use crate::{merger, utils};
use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use std::{fs, path::PathBuf};

/// Merge multiple segments to a single file.
#[derive(Debug, Clone, Args)]
pub struct Merge {
    /// List of files (at least 2) to merge together e.g. *.ts .
    #[arg(required = true)]
    files: Vec<String>,

    /// Path for merged output file.
    #[arg(short, long, required = true)]
    output: PathBuf,

    /// Type of merge to be performed.
    #[arg(short = 't', long = "type", value_enum, default_value_t = MergeKind::Binary)]
    kind: MergeKind,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum MergeKind {
    Binary,
    Ffmpeg,
}

impl Merge {
    pub fn execute(self) -> Result<()> {
        let mut files = vec![];

        for pattern in &self.files {
            for file in glob::glob(pattern)? {
                let file = file?;

                if file != self.output {
                    files.push(file);
                }
            }
        }

        if files.len() < 2 {
            bail!("At least 2 files are required to merge together.");
        }

        match self.kind {
            MergeKind::Binary => merger::concat_binary(&files, &self.output)?,
            MergeKind::Ffmpeg => {
                let Some(ffmpeg) = utils::find_ffmpeg() else {
                    bail!("ffmpeg couldn't be found, it is required to continue further.");
                };

                let manifest = PathBuf::from("hlsget-concat.txt");
                merger::write_manifest(&files, &manifest)?;
                let merged = merger::concat_ffmpeg(&ffmpeg, &manifest, &self.output);
                fs::remove_file(&manifest)?;
                merged?;
            }
        }

        Ok(())
    }
}
