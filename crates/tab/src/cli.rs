use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "SolaSola terminal tab")]
pub struct Args {
    /// Session name; reusing one resumes its tab state
    #[arg(long, env = "SOLASOLA_SESSION", default_value = "default")]
    pub session: String,

    /// Log as JSON lines instead of plain text
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Submit files for processing and follow the task to the end
    Process {
        /// Music files to analyse
        files: Vec<PathBuf>,

        /// Lyrics file to split
        #[arg(long)]
        lyrics: Option<PathBuf>,

        /// Only split the lyrics file
        #[arg(long, requires = "lyrics")]
        lyrics_only: bool,

        /// Expected SHA-256 of a file, as `name=hex`
        #[arg(long = "sha256", value_parser = parse_pair)]
        digests: Vec<(String, String)>,

        /// Extra form field, as `key=value`
        #[arg(long = "field", value_parser = parse_pair)]
        fields: Vec<(String, String)>,
    },
    /// Re-attach to the task left running by this session
    Resume,
    /// Cancel the task left running by this session
    Cancel,
    /// Shared model management
    Models {
        #[command(subcommand)]
        action: ModelsCmd,
    },
    /// Print every event until interrupted
    Watch,
    /// Print the persistent log of this session
    Log {
        /// Clear it after printing
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ModelsCmd {
    /// List models and their install state
    List {
        /// Ask the server to rescan first
        #[arg(long)]
        refresh: bool,
    },
    /// Install a model and follow its progress
    Install { repo_id: String },
    /// Delete an installed model
    Delete { repo_id: String },
    /// Cancel the install this session started
    Cancel { repo_id: String },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("title=a=b").unwrap(),
            ("title".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("=value").is_err());
        assert!(parse_pair("novalue").is_err());
    }

    #[test]
    fn process_arguments_parse() {
        let args = Args::try_parse_from([
            "solasola-tab",
            "process",
            "song.mp3",
            "--sha256",
            "song.mp3=abc",
            "--field",
            "demucs_model=htdemucs",
        ])
        .unwrap();
        match args.cmd {
            Cmd::Process { files, digests, fields, .. } => {
                assert_eq!(files, vec![PathBuf::from("song.mp3")]);
                assert_eq!(digests, vec![("song.mp3".into(), "abc".into())]);
                assert_eq!(fields, vec![("demucs_model".into(), "htdemucs".into())]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn lyrics_only_requires_a_lyrics_file() {
        assert!(Args::try_parse_from(["solasola-tab", "process", "--lyrics-only"]).is_err());
    }
}
