//! Streams values out of a genesis document without loading it whole.
//!
//! The walker descends one dotted path, skipping every sibling with
//! [`IgnoredAny`], and hands each element of the target array (or the single
//! target value) to a sink as soon as it is parsed.

use anyhow::{anyhow, Result};
use serde::de::{
    self, Deserialize, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor,
};
use serde_json::Value;
use std::fmt;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenesisTarget {
    /// Emit every element of the array at the path.
    Array,
    /// Emit the value at the path once.
    Value,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub found: bool,
    pub emitted: usize,
}

/// Splits `app_state.auth.accounts` into its segments.
pub fn path_segments(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Streams the value(s) at `path` to `sink`. A sink error stops the stream
/// and is returned as is.
pub fn stream_path<R, F>(
    reader: R,
    path: &[String],
    target: GenesisTarget,
    mut sink: F,
) -> Result<StreamOutcome>
where
    R: Read,
    F: FnMut(Value) -> Result<()>,
{
    let mut walk = Walk {
        target,
        sink: &mut sink,
        outcome: StreamOutcome::default(),
        sink_error: None,
    };

    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let parsed = PathSeed {
        segments: path,
        walk: &mut walk,
    }
    .deserialize(&mut deserializer)
    .and_then(|()| deserializer.end());

    if let Some(err) = walk.sink_error.take() {
        return Err(err);
    }
    parsed.map_err(|err| anyhow!("invalid genesis document at {}: {err}", path.join(".")))?;
    Ok(walk.outcome)
}

struct Walk<'s, F> {
    target: GenesisTarget,
    sink: &'s mut F,
    outcome: StreamOutcome,
    sink_error: Option<anyhow::Error>,
}

impl<F> Walk<'_, F>
where
    F: FnMut(Value) -> Result<()>,
{
    fn emit<E: de::Error>(&mut self, value: Value) -> Result<(), E> {
        match (self.sink)(value) {
            Ok(()) => {
                self.outcome.emitted += 1;
                Ok(())
            }
            Err(err) => {
                self.sink_error = Some(err);
                Err(E::custom("genesis stream stopped by its consumer"))
            }
        }
    }
}

struct PathSeed<'p, 'w, 's, F> {
    segments: &'p [String],
    walk: &'w mut Walk<'s, F>,
}

impl<'de, F> DeserializeSeed<'de> for PathSeed<'_, '_, '_, F>
where
    F: FnMut(Value) -> Result<()>,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        match self.segments.split_first() {
            None => {
                self.walk.outcome.found = true;
                match self.walk.target {
                    GenesisTarget::Array => deserializer.deserialize_any(ElementsVisitor {
                        walk: self.walk,
                    }),
                    GenesisTarget::Value => {
                        let value = Value::deserialize(deserializer)?;
                        self.walk.emit(value)
                    }
                }
            }
            Some((head, rest)) => deserializer.deserialize_any(DescendVisitor {
                head: head.as_str(),
                rest,
                walk: self.walk,
            }),
        }
    }
}

/// Walks one object level looking for `head`. Anything that is not an object
/// means the path does not exist.
struct DescendVisitor<'p, 'w, 's, F> {
    head: &'p str,
    rest: &'p [String],
    walk: &'w mut Walk<'s, F>,
}

impl<'de, F> Visitor<'de> for DescendVisitor<'_, '_, '_, F>
where
    F: FnMut(Value) -> Result<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an object containing `{}`", self.head)
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut descended = false;
        while let Some(key) = map.next_key::<String>()? {
            if !descended && key == self.head {
                descended = true;
                map.next_value_seed(PathSeed {
                    segments: self.rest,
                    walk: &mut *self.walk,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(())
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<(), E> {
        Ok(())
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<(), E> {
        Ok(())
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<(), E> {
        Ok(())
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<(), E> {
        Ok(())
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<(), E> {
        Ok(())
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        Ok(())
    }
}

struct ElementsVisitor<'w, 's, F> {
    walk: &'w mut Walk<'s, F>,
}

impl<'de, F> Visitor<'de> for ElementsVisitor<'_, '_, F>
where
    F: FnMut(Value) -> Result<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(element) = seq.next_element::<Value>()? {
            self.walk.emit::<A::Error>(element)?;
        }
        Ok(())
    }
}
