use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use citefix::Pipeline;

mod cli;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    match args.command {
        Command::Resolve {
            from,
            json,
            bibtex,
            csl,
            report,
        } => {
            let mut references = Vec::new();
            for source in &from {
                references.extend(source.references()?);
            }
            if references.is_empty() {
                anyhow::bail!("no references given");
            }

            let pipeline = Pipeline::from_env();
            let bar = if references.len() > 1 {
                let bar = ProgressBar::new(references.len() as u64);
                bar.set_style(ProgressStyle::with_template(
                    "{bar:30} {pos}/{len} {msg}",
                )?);
                Some(bar)
            } else {
                None
            };

            let mut failures = 0usize;
            for reference in &references {
                if let Some(bar) = &bar {
                    bar.set_message(preview(reference));
                }
                match pipeline.resolve(reference) {
                    Ok(res) if res.rejected.is_some() => {
                        failures += 1;
                        let msg = res.rejected.as_deref().unwrap_or_default();
                        eprintln!("{} {msg}", "failed:".red());
                    }
                    Ok(res) => {
                        if json {
                            println!("{}", serde_json::to_string_pretty(&res)?);
                        } else {
                            println!("{}", res.formatted);
                            if bibtex {
                                println!("{}", res.bibtex);
                            }
                            if csl {
                                println!("{}", serde_json::to_string_pretty(&res.csl_json)?);
                            }
                            if report {
                                println!("{}", res.report);
                            }
                        }
                        let mark = if res.verified {
                            format!("{}", "verified".green())
                        } else {
                            format!("{}", "unverified".yellow())
                        };
                        eprintln!(
                            "{mark} {} correction(s), {} round(s)",
                            res.corrections.len(),
                            res.rounds
                        );
                    }
                    Err(err) => {
                        failures += 1;
                        eprintln!("{} {err:#}", "failed:".red());
                    }
                }
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            if let Some(bar) = &bar {
                bar.finish_and_clear();
            }
            if failures > 0 {
                anyhow::bail!("{failures} of {} reference(s) failed", references.len());
            }
        }
    }
    Ok(())
}

fn preview(reference: &str) -> String {
    let mut p: String = reference.chars().take(40).collect();
    if reference.chars().count() > 40 {
        p.push('\u{2026}');
    }
    p
}
