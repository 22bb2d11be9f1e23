use anyhow::Result;

use crate::config::Config;
use crate::session::{check_provider, Provider};

/// Print each provider, whether its CLI can be found, and what would run.
pub async fn list_providers(config: &Config) -> Result<()> {
    println!("{:<10} {:<10} {:<10} COMMAND", "PROVIDER", "STATUS", "DEFAULT");

    let mut missing = Vec::new();
    for provider in Provider::ALL {
        let is_default = if provider == config.session.provider {
            "yes"
        } else {
            ""
        };

        // A configured override only applies to the configured provider.
        let resolved = match &config.session.command {
            Some(command) if provider == config.session.provider => Ok(command.clone()),
            _ => check_provider(provider).await,
        };

        match resolved {
            Ok(command) => println!(
                "{:<10} {:<10} {:<10} {}",
                provider.as_str(),
                "OK",
                is_default,
                command.join(" ")
            ),
            Err(e) => {
                println!(
                    "{:<10} {:<10} {:<10} -",
                    provider.as_str(),
                    "MISSING",
                    is_default
                );
                missing.push(e);
            }
        }
    }

    for e in missing {
        println!();
        println!("{}", e);
    }

    Ok(())
}
