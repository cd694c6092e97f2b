#![allow(dead_code)]

use loquat::HashMap;

// Run the test on different configurations of a `HashMap`.
pub fn with_map<K, V>(mut test: impl FnMut(&dyn Fn() -> HashMap<K, V>)) {
    // A single bucket, so growth starts immediately and every operation
    // contends on one cell.
    test(&(|| HashMap::with_capacity(1)));

    // A small table, to exercise growth in the middle of the test.
    test(&(|| HashMap::with_capacity(64)));

    // A table large enough that most tests never resize it.
    test(&(|| HashMap::with_capacity(1 << 14)));
}
