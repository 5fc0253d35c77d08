use colored::{ColoredString, Colorize};
use objgit_core::diff::{DiffLineType, PayloadDiff};
use objgit_core::{ChangeType, Commit, ObjectChange};

const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

pub fn change_icon(change_type: ChangeType) -> ColoredString {
    match change_type {
        ChangeType::Added => "+".green(),
        ChangeType::Modified => "~".yellow(),
        ChangeType::Deleted => "-".red(),
    }
}

pub fn change_label(change_type: ChangeType) -> ColoredString {
    match change_type {
        ChangeType::Added => "NEW".green(),
        ChangeType::Modified => "MOD".yellow(),
        ChangeType::Deleted => "DEL".red(),
    }
}

/// One line per change, truncated after `limit` entries.
pub fn print_changes(changes: &[ObjectChange], limit: usize) {
    for change in changes.iter().take(limit) {
        println!("  {} {}", change_icon(change.change_type), change.id);
    }

    if changes.len() > limit {
        println!(
            "  {} and {} more...",
            "...".dimmed(),
            (changes.len() - limit).to_string().yellow()
        );
    }
}

pub fn print_commit_summary(commit: &Commit) {
    println!("  {}: {}", "Commit ID".bold(), commit.commit_id);
    println!("  {}: {}", "Branch".bold(), commit.branch_name);
    println!("  {}: {}", "Message".bold(), commit.message);
    println!("  {}: {}", "Author".bold(), commit.author);
    println!("  {}: {}", "Changes".bold(), commit.changes.len());
}

pub fn print_payload_diff(diff: &PayloadDiff) {
    println!("{}", "━".repeat(80).bright_black());
    println!(
        "{} {} {}",
        change_label(diff.change_type),
        diff.id.white().bold(),
        format!("(+{} -{})", diff.additions(), diff.deletions()).dimmed()
    );
    println!();

    if diff.is_unchanged() {
        println!("  {}", "[payload unchanged]".dimmed());
        println!();
        return;
    }

    for line in &diff.diff_lines {
        let (prefix, color): (&str, fn(&str) -> ColoredString) = match line.line_type {
            DiffLineType::Addition => ("+", |s| s.green()),
            DiffLineType::Deletion => ("-", |s| s.red()),
            DiffLineType::Context => (" ", |s| s.normal()),
        };
        let text = format!("{}{}", prefix, line.content);
        if text.ends_with('\n') {
            print!("{}", color(&text));
        } else {
            println!("{}", color(&text));
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
