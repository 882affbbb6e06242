use std::borrow::Cow;

type ParamsMapInner = Vec<(Cow<'static, str>, Vec<String>)>;

/// An ordered map of the parameters captured while matching a route path.
///
/// A key can hold several values: repeatable parameters (`:name+`,
/// `:name*`) capture one value per path segment. Insertion order is
/// preserved, and lookups return the most recently added value, so a
/// parameter captured deeper in the route tree shadows an ancestor's
/// value of the same name once [`replace`](Self::replace) has run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ParamsMap(ParamsMapInner);

impl ParamsMap {
    /// Creates an empty map.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with the given capacity.
    #[inline(always)]
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Inserts a value into the map.
    ///
    /// If a value with that key already exists, the new value will be added
    /// to it. To replace the value instead, see [`replace`](Self::replace).
    pub fn insert(&mut self, key: impl Into<Cow<'static, str>>, value: String) {
        let key = key.into();
        if let Some(prev) = self.0.iter_mut().find(|(k, _)| k == &key) {
            prev.1.push(value);
        } else {
            self.0.push((key, vec![value]));
        }
    }

    /// Inserts a value into the map, replacing any existing value for that key.
    pub fn replace(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: String,
    ) {
        let key = key.into();
        if let Some(prev) = self.0.iter_mut().find(|(k, _)| k == &key) {
            prev.1.clear();
            prev.1.push(value);
        } else {
            self.0.push((key, vec![value]));
        }
    }

    /// Installs a full value list for a key, replacing any existing values.
    ///
    /// Used for repeatable parameters, whose captured text is split into
    /// one value per segment. The list may be empty.
    pub fn replace_all(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        values: Vec<String>,
    ) {
        let key = key.into();
        if let Some(prev) = self.0.iter_mut().find(|(k, _)| k == &key) {
            prev.1 = values;
        } else {
            self.0.push((key, values));
        }
    }

    /// Gets the most-recently-added value of this param from the map.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_str(key).map(ToOwned::to_owned)
    }

    /// Gets all values of a param of this name from the map.
    pub fn get_all(&self, key: &str) -> Option<Vec<String>> {
        self.0
            .iter()
            .find_map(|(k, v)| if k == key { Some(v.clone()) } else { None })
    }

    /// Gets a reference to the most-recently-added value of this param.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.iter().find_map(|(k, v)| {
            if k == key {
                v.last().map(|i| i.as_str())
            } else {
                None
            }
        })
    }

    /// Whether the map holds an entry for this key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Removes a value from the map.
    #[inline(always)]
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        for i in 0..self.0.len() {
            if self.0[i].0 == key {
                return Some(self.0.swap_remove(i).1);
            }
        }
        None
    }

    /// The number of keys in the map.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over keys and their value lists in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_ref(), v.as_slice()))
    }
}

impl<K, V> FromIterator<(K, V)> for ParamsMap
where
    K: Into<Cow<'static, str>>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();

        for (key, value) in iter {
            map.insert(key, value.into());
        }
        map
    }
}

impl IntoIterator for ParamsMap {
    type Item = (Cow<'static, str>, String);
    type IntoIter = ParamsMapIter;

    fn into_iter(self) -> Self::IntoIter {
        let inner = self.0.into_iter().fold(vec![], |mut c, (k, vs)| {
            for v in vs {
                c.push((k.clone(), v));
            }
            c
        });
        ParamsMapIter(inner.into_iter())
    }
}

/// An iterator over the keys and values of a [`ParamsMap`].
#[derive(Debug)]
pub struct ParamsMapIter(
    <Vec<(Cow<'static, str>, String)> as IntoIterator>::IntoIter,
);

impl Iterator for ParamsMapIter {
    type Item = (Cow<'static, str>, String);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

/// Builds a [`ParamsMap`] from `key => value` pairs.
#[macro_export]
macro_rules! params_map {
    ($($key:expr => $val:expr),* ,) => (
        $crate::params_map!($($key => $val),*)
    );
    ($($key:expr => $val:expr),*) => ({
        #[allow(unused_mut)]
        let mut map = $crate::ParamsMap::new();
        $( map.replace($key, String::from($val)); )*
        map
    });
}

/// Percent-decodes a captured parameter value, falling back to the raw
/// text when the encoded form is not valid UTF-8.
pub(crate) fn unescape(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8()
        .map(|decoded| decoded.to_string())
        .unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::{unescape, ParamsMap};

    #[test]
    fn insert_appends_and_get_returns_latest() {
        let mut map = ParamsMap::new();
        map.insert("id", "1".to_string());
        map.insert("id", "2".to_string());
        assert_eq!(map.get_str("id"), Some("2"));
        assert_eq!(map.get_all("id"), Some(vec!["1".to_string(), "2".to_string()]));
    }

    #[test]
    fn replace_overwrites() {
        let mut map = ParamsMap::new();
        map.insert("id", "1".to_string());
        map.replace("id", "2".to_string());
        assert_eq!(map.get_all("id"), Some(vec!["2".to_string()]));
    }

    #[test]
    fn replace_all_installs_list() {
        let mut map = ParamsMap::new();
        map.replace("rest", "x".to_string());
        map.replace_all("rest", vec!["a".to_string(), "b".to_string()]);
        assert_eq!(map.get_all("rest"), Some(vec!["a".to_string(), "b".to_string()]));
        map.replace_all("rest", vec![]);
        assert_eq!(map.get_str("rest"), None);
        assert!(map.contains_key("rest"));
    }

    #[test]
    fn unescape_decodes_and_falls_back() {
        assert_eq!(unescape("caf%C3%A9"), "café");
        assert_eq!(unescape("plain"), "plain");
        // invalid UTF-8 after decoding: keep the raw text
        assert_eq!(unescape("%FF"), "%FF");
    }
}
