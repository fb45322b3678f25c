//! Core domain types shared by the gateway and the fairness auditor.
//!
//! Type aliases keep user ids and movie ids apart at a glance, the `Genre`
//! enum covers the MovieLens genre vocabulary, and two read-only lookup
//! structures ([`Catalog`] and [`RatingCounts`]) are built once by the parser
//! and then shared.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DataLoadError;

// =============================================================================
// Type Aliases
// =============================================================================

/// Unique identifier for a user. Supplied by callers, never checked against a
/// dataset by the gateway.
pub type UserId = u32;

/// Unique identifier for a movie (catalog item)
pub type MovieId = u32;

// =============================================================================
// Movie-related Types
// =============================================================================

/// Represents a movie in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    /// Year extracted from title (e.g., "Toy Story (1995)")
    pub year: Option<u16>,
    pub genres: Vec<Genre>,
}

/// Movie genres from MovieLens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Genre {
    Action,
    Adventure,
    Animation,
    Children,
    Comedy,
    Crime,
    Documentary,
    Drama,
    Fantasy,
    FilmNoir,
    Horror,
    Musical,
    Mystery,
    Romance,
    SciFi,
    Thriller,
    War,
    Western,
}

impl Genre {
    /// The label used by the MovieLens files and by exposure logs.
    pub fn label(self) -> &'static str {
        match self {
            Genre::Action => "Action",
            Genre::Adventure => "Adventure",
            Genre::Animation => "Animation",
            Genre::Children => "Children's",
            Genre::Comedy => "Comedy",
            Genre::Crime => "Crime",
            Genre::Documentary => "Documentary",
            Genre::Drama => "Drama",
            Genre::Fantasy => "Fantasy",
            Genre::FilmNoir => "Film-Noir",
            Genre::Horror => "Horror",
            Genre::Musical => "Musical",
            Genre::Mystery => "Mystery",
            Genre::Romance => "Romance",
            Genre::SciFi => "Sci-Fi",
            Genre::Thriller => "Thriller",
            Genre::War => "War",
            Genre::Western => "Western",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Genre {
    type Err = DataLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Action" => Ok(Genre::Action),
            "Adventure" => Ok(Genre::Adventure),
            "Animation" => Ok(Genre::Animation),
            // MovieLens uses "Children's" with apostrophe
            "Children's" | "Children" => Ok(Genre::Children),
            "Comedy" => Ok(Genre::Comedy),
            "Crime" => Ok(Genre::Crime),
            "Documentary" => Ok(Genre::Documentary),
            "Drama" => Ok(Genre::Drama),
            "Fantasy" => Ok(Genre::Fantasy),
            "Film-Noir" => Ok(Genre::FilmNoir),
            "Horror" => Ok(Genre::Horror),
            "Musical" => Ok(Genre::Musical),
            "Mystery" => Ok(Genre::Mystery),
            "Romance" => Ok(Genre::Romance),
            "Sci-Fi" => Ok(Genre::SciFi),
            "Thriller" => Ok(Genre::Thriller),
            "War" => Ok(Genre::War),
            "Western" => Ok(Genre::Western),
            _ => Err(DataLoadError::InvalidValue {
                field: "genre".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Read-only movie lookup used to turn served item ids into genre exposures.
#[derive(Debug, Default)]
pub struct Catalog {
    movies: HashMap<MovieId, Movie>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_movie(&mut self, movie: Movie) {
        self.movies.insert(movie.id, movie);
    }

    pub fn get_movie(&self, id: MovieId) -> Option<&Movie> {
        self.movies.get(&id)
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    /// Genre labels for a ranked list of items, one occurrence per genre per
    /// item. Items missing from the catalog contribute nothing.
    pub fn genres_for(&self, items: &[MovieId]) -> Vec<String> {
        items
            .iter()
            .filter_map(|id| self.movies.get(id))
            .flat_map(|movie| movie.genres.iter().map(|g| g.label().to_string()))
            .collect()
    }
}

impl FromIterator<Movie> for Catalog {
    fn from_iter<I: IntoIterator<Item = Movie>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for movie in iter {
            catalog.insert_movie(movie);
        }
        catalog
    }
}

// =============================================================================
// Rating counts
// =============================================================================

/// Number of historical rating events per user.
///
/// Users that never appear in the dataset have a count of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatingCounts {
    counts: HashMap<UserId, u32>,
}

impl RatingCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more rating event for `user_id`
    pub fn record(&mut self, user_id: UserId) {
        *self.counts.entry(user_id).or_insert(0) += 1;
    }

    pub fn get(&self, user_id: UserId) -> u32 {
        self.counts.get(&user_id).copied().unwrap_or(0)
    }

    /// Number of distinct users seen in the dataset
    pub fn users(&self) -> usize {
        self.counts.len()
    }

    /// Total number of rating rows
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }
}

impl FromIterator<UserId> for RatingCounts {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        let mut counts = RatingCounts::new();
        for user_id in iter {
            counts.record(user_id);
        }
        counts
    }
}
