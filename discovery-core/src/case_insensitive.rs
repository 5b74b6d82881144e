//! A case-insensitive string-keyed map, used to hold HTTP-over-UDP headers
//! when parsing SSDP responses.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct CaseInsensitiveMap<T> {
    map: HashMap<String, T>,
}

impl<T> CaseInsensitiveMap<T> {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.map.get(&key.to_ascii_lowercase())
    }

    pub fn insert(&mut self, key: &str, val: T) -> Option<T> {
        self.map.insert(key.to_ascii_lowercase(), val)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut m = CaseInsensitiveMap::new();
        m.insert("Location", "http://example.com");
        assert_eq!(m.get("location"), Some(&"http://example.com"));
        assert_eq!(m.get("LOCATION"), Some(&"http://example.com"));
    }
}
