use riptide::pool::Pool;

#[test]
fn test_insert_get_remove() {
    let mut pool: Pool<String> = Pool::with_capacity(4);
    let a = pool.insert("a".into()).unwrap();
    let b = pool.insert("b".into()).unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.get(a).unwrap(), "a");
    assert_eq!(pool.get(b).unwrap(), "b");
    assert_eq!(pool.remove(a).unwrap(), "a");
    assert_eq!(pool.len(), 1);
    assert!(pool.get(a).is_none());
}

#[test]
fn test_exhaustion_fails_new_inserts_only() {
    let mut pool: Pool<u32> = Pool::with_capacity(2);
    let a = pool.insert(1).unwrap();
    let _b = pool.insert(2).unwrap();
    assert!(pool.is_full());
    assert!(pool.insert(3).is_none());
    // Existing entries are untouched by exhaustion.
    assert_eq!(*pool.get(a).unwrap(), 1);
    // Freeing makes room again.
    pool.remove(a);
    assert!(pool.insert(4).is_some());
}

#[test]
fn test_slots_are_reused() {
    let mut pool: Pool<u32> = Pool::with_capacity(1);
    let a = pool.insert(10).unwrap();
    pool.remove(a);
    let b = pool.insert(20).unwrap();
    assert_eq!(*pool.get(b).unwrap(), 20);
    assert_eq!(pool.capacity(), 1);
}

#[test]
#[should_panic(expected = "double free")]
fn test_double_free_asserts_in_debug() {
    let mut pool: Pool<u32> = Pool::with_capacity(2);
    let a = pool.insert(1).unwrap();
    pool.remove(a);
    pool.remove(a);
}

#[test]
fn test_iteration_skips_vacant() {
    let mut pool: Pool<u32> = Pool::with_capacity(3);
    let a = pool.insert(1).unwrap();
    let _b = pool.insert(2).unwrap();
    let _c = pool.insert(3).unwrap();
    pool.remove(a);
    let values: Vec<u32> = pool.iter().map(|(_, v)| *v).collect();
    assert_eq!(values, vec![2, 3]);
}
