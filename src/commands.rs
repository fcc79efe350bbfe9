pub mod attachments;
pub mod auth;
pub mod board;
pub mod comments;
pub mod dashboard;
pub mod export;
pub mod init;
pub mod projects;
pub mod subtasks;
pub mod tickets;

use std::io::{self, BufRead, Write};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{QueryKey, QueryOptions};
use crate::context::AppContext;
use crate::error::Result;

/// GET `path` through the query cache under `key`.
pub(crate) async fn fetch<T>(ctx: &AppContext, key: QueryKey, path: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    ctx.cache
        .query(key, QueryOptions::default(), || {
            ctx.client.request(Method::GET, path, None)
        })
        .await
}

/// Read one line from stdin after printing `label`.
pub(crate) fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}
