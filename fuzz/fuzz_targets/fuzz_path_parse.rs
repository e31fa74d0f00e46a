#![no_main]

//! Path interning never panics, and interning is stable per string.

use libfuzzer_sys::fuzz_target;
use wcs_core::PathRegistry;

fuzz_target!(|data: &str| {
    let registry = PathRegistry::new();
    let info = registry.get(data);
    assert_eq!(info.path(), data);
    assert_eq!(registry.get(data).id(), info.id());
    assert_eq!(info.wildcard_paths().len(), info.wildcard_count());
    assert_eq!(info.wildcard_parent_paths().len(), info.wildcard_count());

    if let Some(parent) = registry.parent(&info) {
        assert!(data.starts_with(parent.path()));
        assert!(registry.calc_wildcard_len(&info, &parent) <= parent.wildcard_count());
    }
    let star = registry.child(&info, "*");
    assert_eq!(registry.calc_wildcard_len(&info, &star), registry.calc_wildcard_len(&star, &info));
});
