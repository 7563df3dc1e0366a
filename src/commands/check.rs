use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::ArgMatches;
use studio_runtime::admission;

fn read_fragment(matches: &ArgMatches, name: &str) -> anyhow::Result<String> {
    let path = matches
        .get_one::<String>(name)
        .with_context(|| format!("--{} is required", name))?;
    fs::read_to_string(Path::new(path)).with_context(|| format!("Failed to read {}", path))
}

/// Returns whether all three fragments were admitted
pub fn run(matches: &ArgMatches) -> anyhow::Result<bool> {
    let tokenizer = read_fragment(matches, "tokenizer")?;
    let model = read_fragment(matches, "model")?;
    let function = read_fragment(matches, "function")?;
    let as_json = matches.get_flag("json");

    let verdict = admission::check_all(&tokenizer, &model, &function);

    if as_json {
        let violations = match &verdict {
            Ok(()) => Vec::new(),
            Err(rejection) => rejection.violations.clone(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "valid": verdict.is_ok(),
                "violations": violations,
            }))?
        );
        return Ok(verdict.is_ok());
    }

    match verdict {
        Ok(()) => {
            println!("All fragments admitted");
            Ok(true)
        }
        Err(rejection) => {
            for violation in &rejection.violations {
                println!("{}", violation);
            }
            Ok(false)
        }
    }
}
