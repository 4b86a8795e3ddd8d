//! Check command: validate a playlist file and print what it holds.

use std::path::Path;

use tunefs_store::{parse_playlist, validate_playlist};

pub fn run(playlist: &Path) -> Result<(), Box<dyn std::error::Error>> {
    validate_playlist(playlist)?;
    let entries = parse_playlist(playlist)?;
    println!("{}: {} entries", playlist.display(), entries.len());
    for entry in &entries {
        println!(
            "  {} - {} - {} ({})",
            entry.artist,
            entry.album,
            entry.title,
            entry.path.display()
        );
    }
    Ok(())
}
