use std::fmt;

use itertools::Itertools;

/// Named values in the order they were requested.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterResult {
    results: Vec<(String, f64)>,
}

impl CounterResult {
    pub fn new(results: Vec<(String, f64)>) -> Self {
        Self { results }
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: f64) {
        self.results.push((name.into(), value));
    }

    /// Value of the first entry named `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.results
            .iter()
            .find(|(it, _)| it == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.results.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// One `name<delimiter>value` line per entry.
    pub fn to_csv(&self, delimiter: char, header: bool) -> String {
        let header = header.then(|| format!("counter{delimiter}value\n"));
        let rows = self
            .iter()
            .format_with("", |(name, value), f| f(&format_args!("{name}{delimiter}{value}\n")));
        format!("{}{rows}", header.unwrap_or_default())
    }

    /// A JSON object mapping every name to its value, in order.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl IntoIterator for CounterResult {
    type Item = (String, f64);
    type IntoIter = std::vec::IntoIter<(String, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl FromIterator<(String, f64)> for CounterResult {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for CounterResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.results.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for CounterResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = CounterResult;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of counter names to values")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut results = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, f64>()? {
                    results.push(entry);
                }
                Ok(CounterResult::new(results))
            }
        }

        deserializer.deserialize_map(Visitor)
    }
}

impl fmt::Display for CounterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<_> = self.iter().map(|(_, it)| format!("{it:.3}")).collect();
        let width = values.iter().map(String::len).chain(["value".len()]).max().unwrap_or(0);

        writeln!(f, "{:>width$} | counter", "value")?;
        writeln!(f, "{:->width$}-+--------", "")?;
        for ((name, _), value) in self.iter().zip(&values) {
            writeln!(f, "{value:>width$} | {name}")?;
        }
        Ok(())
    }
}
