//! [`SqlitePreferences`]: durable key-value pairs in the `preferences` table.

use pumpsync_core::store::Preferences;
use rusqlite::OptionalExtension as _;

use crate::{Error, Result};

/// Key-value preferences sharing the store's connection.
#[derive(Clone)]
pub struct SqlitePreferences {
  conn: tokio_rusqlite::Connection,
}

impl SqlitePreferences {
  pub(crate) fn new(conn: tokio_rusqlite::Connection) -> Self { Self { conn } }

  async fn get(&self, key: &str) -> Result<Option<(Option<String>, Option<i64>)>> {
    let key = key.to_owned();
    let row = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT text_value, long_value FROM preferences WHERE key = ?1",
              rusqlite::params![key],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(row)
  }

  async fn put(&self, key: &str, text: Option<String>, long: Option<i64>) -> Result<()> {
    let key = key.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO preferences (key, text_value, long_value) VALUES (?1, ?2, ?3)
           ON CONFLICT (key) DO UPDATE
           SET text_value = excluded.text_value, long_value = excluded.long_value",
          rusqlite::params![key, text, long],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl Preferences for SqlitePreferences {
  type Error = Error;

  async fn get_string(&self, key: &str) -> Result<Option<String>> {
    Ok(self.get(key).await?.and_then(|(text, _)| text))
  }

  async fn get_long(&self, key: &str) -> Result<Option<i64>> {
    Ok(self.get(key).await?.and_then(|(_, long)| long))
  }

  async fn put_string(&self, key: &str, value: String) -> Result<()> {
    self.put(key, Some(value), None).await
  }

  async fn put_long(&self, key: &str, value: i64) -> Result<()> {
    self.put(key, None, Some(value)).await
  }

  async fn remove(&self, key: &str) -> Result<()> {
    let key = key.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM preferences WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
