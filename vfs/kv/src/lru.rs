use indexmap::IndexMap;

/// Least-recently-used map. The most recent entry sits at the back.
#[derive(Debug)]
pub(crate) struct LruCache {
    limit: usize,
    map: IndexMap<String, String>,
}

impl LruCache {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            map: IndexMap::with_capacity(limit),
        }
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<String> {
        let idx = self.map.get_index_of(key)?;
        let last = self.map.len() - 1;
        self.map.move_index(idx, last);
        self.map.get_index(last).map(|(_, v)| v.clone())
    }

    pub(crate) fn set(&mut self, key: &str, value: String) {
        if self.map.shift_remove(key).is_none() && self.map.len() >= self.limit {
            self.map.shift_remove_index(0);
        }
        self.map.insert(key.to_owned(), value);
    }

    pub(crate) fn remove(&mut self, key: &str) {
        self.map.shift_remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.set("/a", "1".to_owned());
        cache.set("/b", "2".to_owned());
        assert_eq!(cache.get("/a").as_deref(), Some("1"));
        cache.set("/c", "3".to_owned());
        assert_eq!(cache.get("/b"), None);
        assert_eq!(cache.get("/a").as_deref(), Some("1"));
        assert_eq!(cache.get("/c").as_deref(), Some("3"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwrite_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.set("/a", "1".to_owned());
        cache.set("/b", "2".to_owned());
        cache.set("/a", "9".to_owned());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("/a").as_deref(), Some("9"));
        cache.remove("/a");
        assert_eq!(cache.get("/a"), None);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
