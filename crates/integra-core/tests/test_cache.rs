use std::path::Path;

use tempfile::TempDir;

use integra_core::fileset::cache::StatisticsCache;
use integra_core::fileset::estimates::ChannelStatistics;
use integra_core::fileset::source::FileSignature;

fn stats(median: f64) -> ChannelStatistics {
    ChannelStatistics {
        count: 10,
        mean: median,
        median,
        ..ChannelStatistics::default()
    }
}

fn touch(path: &Path, bytes: usize) -> FileSignature {
    std::fs::write(path, vec![0u8; bytes]).unwrap();
    FileSignature::of(path).unwrap()
}

#[test]
fn test_cache_persists_across_open() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("frame.tiff");
    let sig = touch(&frame, 64);
    let cache_path = dir.path().join("cache.toml");

    let mut cache = StatisticsCache::open(&cache_path);
    assert!(cache.is_empty());
    cache.insert(&frame, sig, vec![stats(0.25)]);
    cache.save().unwrap();

    let cache = StatisticsCache::open(&cache_path);
    assert_eq!(cache.len(), 1);
    let hit = cache.get(&frame, sig).unwrap();
    assert_eq!(hit[0].median, 0.25);
}

#[test]
fn test_changed_file_misses() {
    let dir = TempDir::new().unwrap();
    let frame = dir.path().join("frame.tiff");
    let sig = touch(&frame, 64);
    let mut cache = StatisticsCache::in_memory();
    cache.insert(&frame, sig, vec![stats(0.25)]);

    let changed = FileSignature {
        size: sig.size + 1,
        ..sig
    };
    assert!(cache.get(&frame, changed).is_none());
    assert!(cache.get(&dir.path().join("other.tiff"), sig).is_none());
}

#[test]
fn test_invalid_cache_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("cache.toml");
    std::fs::write(&cache_path, "this is = = not toml").unwrap();
    let cache = StatisticsCache::open(&cache_path);
    assert!(cache.is_empty());
}

#[test]
fn test_in_memory_cache_never_writes() {
    let mut cache = StatisticsCache::in_memory();
    cache.insert(Path::new("nowhere.tiff"), FileSignature { size: 1, modified_ns: 2 }, vec![stats(0.1)]);
    assert!(cache.save().is_ok());
    cache.clear();
    assert!(cache.is_empty());
}
