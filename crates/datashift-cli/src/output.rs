use std::path::Path;

use datashift_core::{MigrationReport, StatusReport};

pub fn print_report(report: &MigrationReport) {
    if report.is_noop() {
        println!("  Nothing to do");
    }
    for version in &report.applied {
        println!("  ✓ applied  {version}");
    }
    for version in &report.reverted {
        println!("  ✓ reverted {version}");
    }
    println!("  Current version: {}", report.current_version);
}

pub fn print_status(status: &StatusReport, dir: &Path) {
    if status.migrations.is_empty() && status.orphaned.is_empty() {
        println!("  No data migrations found in {}", dir.display());
        return;
    }

    for m in &status.migrations {
        let state = match m.applied_at {
            Some(at) => format!("applied {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "pending".to_string(),
        };
        let down = if m.reversible { "↓" } else { "-" };
        println!("  {down} {:<14}  {:<28}  {state}", m.version, m.name);
    }

    for orphan in &status.orphaned {
        println!(
            "  ? {:<14}  {:<28}  applied {} (no file)",
            orphan.version,
            "",
            orphan.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!(
        "  {} applied, {} pending, current version {}",
        status.applied().count(),
        status.pending().count(),
        status.current_version
    );
    println!("  ↓ = has down migration, - = no down migration");
}
