//! `#[serde(with = "duration_ms")]`: a [`chrono::Duration`] as integer
//! milliseconds.

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_i64(d.num_milliseconds())
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
  let ms = i64::deserialize(d)?;
  Duration::try_milliseconds(ms)
    .ok_or_else(|| D::Error::custom(format!("duration out of range: {ms} ms")))
}

#[cfg(test)]
mod tests {
  use serde::{Deserialize, Serialize};

  use super::*;

  #[derive(Debug, Serialize, Deserialize)]
  struct Window {
    #[serde(with = "super")]
    duration: Duration,
  }

  #[test]
  fn reads_and_writes_milliseconds() {
    let w: Window = serde_json::from_str(r#"{"duration":90000}"#).unwrap();
    assert_eq!(w.duration, Duration::seconds(90));
    assert_eq!(serde_json::to_string(&w).unwrap(), r#"{"duration":90000}"#);
  }

  #[test]
  fn out_of_range_duration_is_an_error() {
    let err = serde_json::from_str::<Window>(r#"{"duration":-9223372036854775808}"#)
      .unwrap_err();
    assert!(err.to_string().contains("duration out of range"));
  }
}
