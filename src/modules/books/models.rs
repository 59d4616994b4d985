use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A catalog record as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Book {
    /// Storage-assigned identifier, never changed after creation
    pub id: i64,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub published_year: i32,
    /// Not unique; several copies may share an ISBN
    pub isbn: String,
    pub availability: bool,
}

/// Request model for creating a new book.
///
/// Absent and `null` fields decode to their zero value so that `validate`
/// can report every missing field at once instead of failing on the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewBook {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub author: String,
    #[serde(deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(deserialize_with = "null_as_default")]
    pub published_year: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub isbn: String,
    #[serde(deserialize_with = "null_as_default")]
    pub availability: bool,
}

impl NewBook {
    /// Every field except `availability` must be present and non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing: Vec<&'static str> = [
            ("title", self.title.is_empty()),
            ("author", self.author.is_empty()),
            ("genre", self.genre.is_empty()),
            ("published_year", self.published_year == 0),
            ("isbn", self.isbn.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { missing })
        }
    }

    pub fn into_book(self, id: i64) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            genre: self.genre,
            published_year: self.published_year,
            isbn: self.isbn,
            availability: self.availability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required field(s): {}", .missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

/// Partial update applied by `PUT /books/{id}`.
///
/// Absent or `null` fields leave the stored value alone. Empty strings and a
/// zero `published_year` are treated the same way, so a required field can
/// never be blanked; `availability` is applied whenever it is present.
/// An `id` in the body is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<bool>,
}

impl BookChanges {
    /// The changes that actually overwrite something: blank strings and a
    /// zero year become `None`.
    pub fn supplied(&self) -> BookChanges {
        BookChanges {
            title: non_blank(&self.title),
            author: non_blank(&self.author),
            genre: non_blank(&self.genre),
            published_year: self.published_year.filter(|year| *year != 0),
            isbn: non_blank(&self.isbn),
            availability: self.availability,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|value| !value.is_empty())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
