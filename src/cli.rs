use std::{fs, path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify and correct one or more references
    Resolve {
        #[arg(value_name = "REF")]
        from: Vec<Source>,
        /// Print the full resolution as JSON instead of the formatted line
        #[arg(long)]
        json: bool,
        /// Print the BibTeX entry after the formatted line
        #[arg(long)]
        bibtex: bool,
        /// Print the CSL-JSON item after the formatted line
        #[arg(long)]
        csl: bool,
        /// Print the verification report after the formatted line
        #[arg(long)]
        report: bool,
    },
}

#[derive(Clone, Debug)]
/// Where references come from: either
///
/// - a reference string given inline, or
/// - a text file with one reference per line.
///
/// The latter is treated as a list of the former.
pub enum Source {
    Reference(String),
    File(PathBuf),
}

impl FromStr for Source {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A reference string is never a path on disk, so an existing file
        // is the only signal we need.
        if let Ok(path) = fs::canonicalize(s) {
            Ok(Source::File(path))
        } else {
            Ok(Source::Reference(s.to_string()))
        }
    }
}

impl Source {
    /// Expand into individual reference strings. Blank lines and `#`
    /// comments in files are skipped.
    pub fn references(&self) -> anyhow::Result<Vec<String>> {
        match self {
            Source::Reference(r) => Ok(vec![r.clone()]),
            Source::File(path) => {
                let text = fs::read_to_string(path)?;
                Ok(text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string)
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn from_str_identifies_existing_file() {
        let tmp = NamedTempFile::new().expect("tmp file");
        let path = tmp.path().to_path_buf();
        let src = Source::from_str(path.to_str().unwrap()).expect("parse");
        match src {
            Source::File(p) => {
                let can = std::fs::canonicalize(&path).unwrap();
                assert_eq!(p, can);
            }
            _ => panic!("expected file source"),
        }
    }

    #[test]
    fn file_expands_to_lines_without_comments() {
        let mut tmp = NamedTempFile::new().expect("tmp file");
        writeln!(tmp, "# header").unwrap();
        writeln!(tmp, "A. B, \"First,\" 2020.").unwrap();
        writeln!(tmp).unwrap();
        writeln!(tmp, "C. D, \"Second,\" 2021.").unwrap();
        let src = Source::from_str(tmp.path().to_str().unwrap()).expect("parse");
        let refs = src.references().expect("read");
        assert_eq!(refs.len(), 2);
        assert!(refs[0].contains("First"));
    }

    #[test]
    fn from_str_falls_back_to_reference() {
        proptest::proptest!(|(s in "[A-Za-z0-9._-]{1,32}")| {
            let path = PathBuf::from(&s);
            proptest::prop_assume!(!path.exists());
            let src = Source::from_str(&s).expect("parse");
            match src {
                Source::Reference(r) => proptest::prop_assert_eq!(r, s),
                Source::File(_) => proptest::prop_assert!(false, "should not be a file"),
            }
        })
    }
}
