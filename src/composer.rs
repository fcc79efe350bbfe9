//! Comment composer with `@mention` suggestions and attachments.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::{Mutation, QueryCache};
use crate::client::{TmsClient, UploadFile};
use crate::error::{Result, TmsError};
use crate::types::{Comment, ProjectMember};

fn trailing_mention() -> &'static Regex {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    MENTION.get_or_init(|| Regex::new(r"@(\w*)$").expect("valid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter { shift: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Edited,
    Submit,
}

/// Where the suggestion panel goes: the `@` position as zero-based line and
/// character column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Nothing to send.
    Empty,
    Posted {
        comment: Option<Comment>,
        uploaded: usize,
    },
    /// The comment exists but its files do not. They stay staged for a retry.
    PostedUploadFailed {
        comment: Option<Comment>,
        error: TmsError,
    },
}

#[derive(Debug, Default)]
pub struct Composer {
    text: String,
    cursor: usize,
    members: Vec<ProjectMember>,
    files: Vec<UploadFile>,
    internal: bool,
}

impl Composer {
    pub fn new(members: Vec<ProjectMember>) -> Self {
        Self {
            members,
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Replace the whole text and put the cursor at its end.
    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.cursor = self.text.len();
    }

    /// Move the cursor to byte offset `pos`, clamped to a char boundary.
    #[cfg(test)]
    pub fn set_cursor(&mut self, pos: usize) {
        let mut pos = pos.min(self.text.len());
        while !self.text.is_char_boundary(pos) {
            pos -= 1;
        }
        self.cursor = pos;
    }

    pub fn insert_str(&mut self, s: &str) {
        self.text.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    pub fn set_internal(&mut self, internal: bool) {
        self.internal = internal;
    }

    pub fn attach(&mut self, file: UploadFile) {
        self.files.push(file);
    }

    pub fn remove_file(&mut self, index: usize) -> Option<UploadFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    pub fn handle_key(&mut self, key: Key) -> KeyAction {
        match key {
            Key::Enter { shift: false } => return KeyAction::Submit,
            Key::Enter { shift: true } => self.insert_str("\n"),
            Key::Char(c) => {
                let mut buf = [0u8; 4];
                self.insert_str(c.encode_utf8(&mut buf));
            }
        }
        KeyAction::Edited
    }

    fn mention_start(&self) -> Option<usize> {
        trailing_mention()
            .find(&self.text[..self.cursor])
            .map(|m| m.start())
    }

    /// The partial name typed after a trailing `@`, if the cursor is in one.
    pub fn mention_query(&self) -> Option<&str> {
        let start = self.mention_start()?;
        Some(&self.text[start + 1..self.cursor])
    }

    pub fn anchor(&self) -> Option<Anchor> {
        let start = self.mention_start()?;
        let before = &self.text[..start];
        let line = before.matches('\n').count();
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        Some(Anchor {
            line,
            column: before[line_start..].chars().count(),
        })
    }

    /// Members whose name contains the typed token, names starting with it
    /// first. Empty when no mention is being typed.
    pub fn suggestions(&self) -> Vec<&ProjectMember> {
        let Some(query) = self.mention_query() else {
            return Vec::new();
        };
        let query = query.to_lowercase();

        let mut matches: Vec<(bool, &ProjectMember)> = self
            .members
            .iter()
            .filter_map(|m| {
                let name = m.name.to_lowercase();
                name.contains(&query).then(|| (!name.starts_with(&query), m))
            })
            .collect();
        matches.sort_by_key(|(not_prefix, _)| *not_prefix);
        matches.into_iter().map(|(_, m)| m).collect()
    }

    /// Replace the trailing `@token` with `@Full Name ` and move the cursor
    /// past it. Text after the cursor is left alone.
    pub fn select(&mut self, member: &ProjectMember) -> bool {
        let Some(start) = self.mention_start() else {
            return false;
        };
        let replacement = format!("@{} ", member.name);
        self.text.replace_range(start..self.cursor, &replacement);
        self.cursor = start + replacement.len();
        true
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.files.is_empty()
    }

    /// Post the comment, then upload staged files in one request.
    ///
    /// The two steps are not atomic: an upload failure after the comment was
    /// created is reported as `PostedUploadFailed`, not as an error.
    pub async fn submit(
        &mut self,
        client: &TmsClient,
        cache: &QueryCache,
        ticket_id: &str,
    ) -> Result<SubmitOutcome> {
        if self.is_empty() {
            return Ok(SubmitOutcome::Empty);
        }

        let comment = if self.text.trim().is_empty() {
            None
        } else {
            let path = format!("/tickets/{ticket_id}/comments");
            let body = json!({ "comment_text": self.text, "is_internal": self.internal });
            let comment: Comment = cache
                .mutate(
                    Mutation::AddComment {
                        ticket_id: ticket_id.to_string(),
                    },
                    client.request(Method::POST, &path, Some(body)),
                )
                .await?;
            debug!(ticket = ticket_id, comment = %comment.id, "comment posted");
            self.text.clear();
            self.cursor = 0;
            Some(comment)
        };

        if self.files.is_empty() {
            return Ok(SubmitOutcome::Posted {
                comment,
                uploaded: 0,
            });
        }

        let path = format!("/tickets/{ticket_id}/attachments");
        let upload = cache
            .mutate(
                Mutation::UploadAttachments {
                    ticket_id: ticket_id.to_string(),
                },
                client.upload_files::<Value>(&path, &self.files),
            )
            .await;

        match upload {
            Ok(_) => Ok(SubmitOutcome::Posted {
                comment,
                uploaded: std::mem::take(&mut self.files).len(),
            }),
            Err(error) if comment.is_some() => {
                warn!(ticket = ticket_id, error = %error, "comment posted but upload failed");
                Ok(SubmitOutcome::PostedUploadFailed { comment, error })
            }
            Err(error) => Err(error),
        }
    }
}
