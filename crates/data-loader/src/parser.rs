//! Parsers for the dataset files the system consumes:
//! - ratings table (CSV with a header, or MovieLens `ratings.dat`)
//! - movie catalog (MovieLens `movies.dat`: movieId::title::genres)
//!
//! Both formats come from the MovieLens exports, which are ISO-8859-1 encoded,
//! so every file is read through [`read_lines_latin1`].

use crate::error::{DataLoadError, Result};
use crate::types::*;
use rayon::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Header names accepted for the user column of a ratings CSV
pub const USER_COLUMN_NAMES: &[&str] = &["UserId", "User_ID", "user_id", "userId"];

/// Helper function to read a file with ISO-8859-1 encoding (Latin-1)
///
/// Each byte maps directly to a Unicode code point, so the conversion never
/// fails. Plain ASCII files (the usual CSV export) are unaffected.
fn read_lines_latin1(path: &Path) -> Result<Vec<String>> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DataLoadError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => DataLoadError::IoError(e),
    })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let content: String = bytes.iter().map(|&b| b as char).collect();

    Ok(content.lines().map(|s| s.to_string()).collect())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// Ratings
// =============================================================================

/// Count rating rows per user.
///
/// `.dat` files are read as MovieLens `userId::movieId::rating::timestamp`;
/// anything else is treated as a CSV table with a header row naming one of
/// [`USER_COLUMN_NAMES`]. Only the user column is interpreted.
pub fn parse_rating_counts(path: &Path) -> Result<RatingCounts> {
    let lines = read_lines_latin1(path)?;
    let file = file_label(path);

    let is_dat = path.extension().is_some_and(|ext| ext == "dat");
    let user_ids = if is_dat {
        parse_dat_user_ids(&lines, &file)?
    } else {
        parse_csv_user_ids(&lines, &file)?
    };

    let counts: RatingCounts = user_ids.into_iter().collect();
    debug!(
        "Counted {} ratings across {} users in {}",
        counts.total(),
        counts.users(),
        file
    );
    Ok(counts)
}

fn parse_dat_user_ids(lines: &[String], file: &str) -> Result<Vec<UserId>> {
    let parsed: Vec<Option<UserId>> = lines
        .par_iter()
        .enumerate()
        .map(|(idx, line)| {
            let line_trimmed = line.trim();
            if line_trimmed.is_empty() {
                return Ok(None);
            }
            let user_id = line_trimmed.split("::").next().unwrap_or_default();
            parse_user_id(user_id, file, idx + 1).map(Some)
        })
        .collect::<Result<_>>()?;
    Ok(parsed.into_iter().flatten().collect())
}

fn parse_csv_user_ids(lines: &[String], file: &str) -> Result<Vec<UserId>> {
    let mut rows = lines.iter().enumerate();

    let header = rows
        .by_ref()
        .find(|(_, line)| !line.trim().is_empty())
        .map(|(_, line)| split_csv_row(line))
        .ok_or_else(|| DataLoadError::ParseError {
            file: file.to_string(),
            line: 1,
            reason: "Missing header row".to_string(),
        })?;

    let column = header
        .iter()
        .position(|name| USER_COLUMN_NAMES.contains(&name.trim()))
        .ok_or_else(|| DataLoadError::MissingColumn {
            file: file.to_string(),
            expected: USER_COLUMN_NAMES.join(", "),
        })?;

    let body: Vec<(usize, &String)> = rows.collect();
    let parsed: Vec<Option<UserId>> = body
        .par_iter()
        .map(|(idx, line)| {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                return Ok(None);
            }
            let fields = split_csv_row(line);
            let value = fields.get(column).ok_or_else(|| DataLoadError::ParseError {
                file: file.to_string(),
                line: line_no,
                reason: format!("Missing user column (index {})", column),
            })?;
            parse_user_id(value, file, line_no).map(Some)
        })
        .collect::<Result<_>>()?;
    Ok(parsed.into_iter().flatten().collect())
}

fn parse_user_id(value: &str, file: &str, line: usize) -> Result<UserId> {
    value.trim().parse().map_err(|e| DataLoadError::ParseError {
        file: file.to_string(),
        line,
        reason: format!("Invalid userId {:?}: {}", value, e),
    })
}

/// Split one CSV row on commas, honouring double-quoted fields.
fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

// =============================================================================
// Catalog
// =============================================================================

/// Parse the movies.dat file into a [`Catalog`]
///
/// Format: movieId::title::genres
///
/// The title often includes year in parentheses: "Toy Story (1995)"
/// Genres are pipe-separated: "Animation|Children's|Comedy"
pub fn parse_catalog(path: &Path) -> Result<Catalog> {
    let lines = read_lines_latin1(path)?;
    let file = file_label(path);
    let mut catalog = Catalog::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let line_trimmed = line.trim();
        if line_trimmed.is_empty() {
            continue;
        }

        let mut parts = line_trimmed.split("::");
        let mut field = |name: &str| {
            parts.next().ok_or_else(|| DataLoadError::ParseError {
                file: file.clone(),
                line: line_no,
                reason: format!("Missing {}", name),
            })
        };

        let movie_id = field("movieId")?;
        let title = field("title")?;
        let genres_str = field("genres")?;

        catalog.insert_movie(Movie {
            id: movie_id.parse().map_err(|e| DataLoadError::ParseError {
                file: file.clone(),
                line: line_no,
                reason: format!("Invalid movieId: {}", e),
            })?,
            title: title.to_string(),
            year: extract_year_from_title(title),
            genres: parse_genres(genres_str)?,
        });
    }

    debug!("Loaded {} movies from {}", catalog.len(), file);
    Ok(catalog)
}

/// Extract year from movie title
///
/// Example: "Toy Story (1995)" -> Some(1995)
///          "Movie Title" -> None
fn extract_year_from_title(title: &str) -> Option<u16> {
    let start = title.rfind('(')?;
    let end = title.rfind(')')?;
    if start < end {
        return title[start + 1..end].parse::<u16>().ok();
    }
    None
}

/// Parse pipe-separated genres
///
/// Example: "Action|Adventure|Sci-Fi" -> vec![Genre::Action, Genre::Adventure, Genre::SciFi]
fn parse_genres(s: &str) -> Result<Vec<Genre>> {
    s.split('|').map(str::parse).collect()
}
