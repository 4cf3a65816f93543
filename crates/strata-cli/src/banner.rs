use std::path::Path;

use strata_config::AppConfig;
use strata_db::{MigrationState, MigrationStatus};

/// Print a boxed summary of where migrations come from and go to.
pub fn print_banner(config: &AppConfig) {
    let version = env!("CARGO_PKG_VERSION");

    let sources = if config.migrations.sources.is_empty() {
        "none".to_string()
    } else {
        config
            .migrations
            .sources
            .iter()
            .map(|p| shorten_home(p))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let width = 70;
    let inner = width - 4; // "│ " + " │"

    let title = format!("Strata v{version}");
    let title_dashes = width - 2 - title.len() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |text: &str| format!("│ {:<inner$} │", text);

    println!("{top}");
    println!("{}", row(&format!("Database    {}", shorten_home(&config.database.path))));
    println!("{}", row(&format!("Ledger      {}", config.migrations.table)));
    println!("{}", row(&format!("Sources     {sources}")));
    println!("{bottom}");
}

/// One line per migration, followed by a count summary.
pub fn print_status(statuses: &[MigrationStatus]) {
    if statuses.is_empty() {
        println!("No migrations found.");
        return;
    }

    let name_w = statuses.iter().map(|s| s.name.len()).max().unwrap_or(0);
    let mut pending = 0;
    for status in statuses {
        let detail = match &status.state {
            MigrationState::Pending => {
                pending += 1;
                "pending".to_string()
            }
            MigrationState::Applied { batch, applied_at } => {
                format!("applied   batch {batch:<4} {}", applied_at.format("%Y-%m-%d %H:%M:%S"))
            }
            MigrationState::Orphaned { batch, applied_at } => format!(
                "orphaned  batch {batch:<4} {}  (definition missing)",
                applied_at.format("%Y-%m-%d %H:%M:%S")
            ),
        };
        println!("  {:<name_w$}  {detail}", status.name);
    }

    println!();
    println!("{} migrations, {pending} pending", statuses.len());
}

fn shorten_home(path: &Path) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => path.to_string_lossy().replace(&home, "~"),
        _ => path.to_string_lossy().to_string(),
    }
}
