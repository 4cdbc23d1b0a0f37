//! Book catalogue types.
//!
//! The backend's list schema only guarantees `id`, `title` and
//! `author_names`; the richer fields are optional so both the short and the
//! detailed representations parse into the same type.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub author_names: String,
    pub isbn_10: Option<String>,
    pub isbn_13: Option<String>,
    pub publisher: Option<Publisher>,
    pub publication_date: Option<String>,
    pub edition: Option<String>,
    pub language: Option<String>,
    pub pages: Option<u32>,
    pub format: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub cover_image: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Book {
    /// Display line: "Title: Subtitle by Authors"
    pub fn display_title(&self) -> String {
        let mut title = match self.subtitle.as_deref() {
            Some(sub) if !sub.is_empty() => format!("{}: {}", self.title, sub),
            _ => self.title.clone(),
        };
        let authors = self.authors_display();
        if !authors.is_empty() {
            title.push_str(" by ");
            title.push_str(&authors);
        }
        title
    }

    /// Prefer the server-joined `author_names`, else join the nested authors
    pub fn authors_display(&self) -> String {
        if !self.author_names.is_empty() {
            return self.author_names.clone();
        }
        self.authors
            .iter()
            .map(|a| {
                if a.full_name.is_empty() {
                    format!("{} {}", a.first_name, a.last_name)
                } else {
                    a.full_name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// ISBN-13 when known, otherwise ISBN-10
    pub fn isbn(&self) -> Option<&str> {
        self.isbn_13.as_deref().or(self.isbn_10.as_deref())
    }
}
