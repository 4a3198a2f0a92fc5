use nitrite::common::{AttributeAware, Value, LAST_MODIFIED_TIME};
use nitrite::errors::{ErrorKind, NitriteResult};
use nitrite::store::NitriteMap;
use nitrite_int_test::test_util::{run_on, run_on_all, Backend};
use std::sync::Barrier;
use std::thread;

#[ctor::ctor]
fn init() {
    colog::init();
}

fn key(k: &str) -> Value {
    Value::from(k)
}

fn collect_keys(map: &NitriteMap) -> NitriteResult<Vec<Value>> {
    map.keys()?.collect()
}

#[test]
fn test_basic_operations() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("basic")?;
        map.put(key("a"), Value::from(1))?;
        map.put(key("b"), Value::from(2))?;
        map.put(key("c"), Value::from(3))?;

        assert_eq!(map.floor_key(&key("b"))?, Some(key("b")));
        assert_eq!(map.higher_key(&key("b"))?, Some(key("c")));
        assert_eq!(map.size()?, 3);

        assert_eq!(map.remove(&key("b"))?, Some(Value::from(2)));
        assert_eq!(map.size()?, 2);
        assert_eq!(map.get(&key("b"))?, None);
        assert_eq!(map.remove(&key("b"))?, None);
        assert!(map.contains_key(&key("a"))?);
        assert!(!map.contains_key(&key("b"))?);
        Ok(())
    });
}

#[test]
fn test_put_overwrites() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("overwrite")?;
        map.put(key("k"), Value::from("first"))?;
        map.put(key("k"), Value::from("second"))?;
        assert_eq!(map.get(&key("k"))?, Some(Value::from("second")));
        assert_eq!(map.size()?, 1);
        Ok(())
    });
}

#[test]
fn test_null_value_rejected() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("nulls")?;
        let err = map.put(key("k"), Value::Null).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert_eq!(map.size()?, 0);
        Ok(())
    });
}

#[test]
fn test_ordering_is_identical_across_backends() {
    let inserted = [42i64, -7, 0, 1000, 13, -300, 8];
    let mut expected: Vec<Value> = inserted.iter().map(|k| Value::from(*k)).collect();
    expected.sort();

    run_on_all(|ctx| {
        let map = ctx.store().open_map("ordering")?;
        for k in inserted {
            map.put(Value::from(k), Value::from(format!("v{}", k)))?;
        }

        assert_eq!(collect_keys(&map)?, expected);
        let values: Vec<Value> = map.values()?.collect::<NitriteResult<_>>()?;
        assert_eq!(values[0], Value::from("v-300"));

        // neighbours agree with the sorted order
        for pair in expected.windows(2) {
            let (k1, k2) = (&pair[0], &pair[1]);
            assert_eq!(map.floor_key(k2)?.as_ref(), Some(k2));
            assert_eq!(map.lower_key(k2)?.as_ref(), Some(k1));
            assert_eq!(map.higher_key(k1)?.as_ref(), Some(k2));
            assert_eq!(map.ceiling_key(k1)?.as_ref(), Some(k1));
        }

        assert_eq!(map.first_key()?, Some(Value::from(-300)));
        assert_eq!(map.last_key()?, Some(Value::from(1000)));
        Ok(())
    });
}

#[test]
fn test_navigation_between_keys() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("between")?;
        map.put(Value::from(10), Value::from("ten"))?;
        map.put(Value::from(20), Value::from("twenty"))?;

        let absent = Value::from(15);
        assert_eq!(map.floor_key(&absent)?, Some(Value::from(10)));
        assert_eq!(map.lower_key(&absent)?, Some(Value::from(10)));
        assert_eq!(map.ceiling_key(&absent)?, Some(Value::from(20)));
        assert_eq!(map.higher_key(&absent)?, Some(Value::from(20)));
        Ok(())
    });
}

#[test]
fn test_navigation_boundaries() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("boundaries")?;
        assert_eq!(map.first_key()?, None);
        assert_eq!(map.last_key()?, None);
        assert_eq!(map.floor_key(&key("x"))?, None);
        assert_eq!(map.higher_key(&key("x"))?, None);

        for k in ["m", "c", "x"] {
            map.put(key(k), Value::from(k))?;
        }

        assert_eq!(map.floor_key(&key("a"))?, None);
        assert_eq!(map.lower_key(&key("c"))?, None);
        assert_eq!(map.ceiling_key(&key("y"))?, None);
        assert_eq!(map.higher_key(&key("x"))?, None);

        assert_eq!(map.floor_key(&key("c"))?, Some(key("c")));
        assert_eq!(map.ceiling_key(&key("x"))?, Some(key("x")));
        Ok(())
    });
}

#[test]
fn test_iterators_are_restartable() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("restart")?;
        for i in 0..5 {
            map.put(Value::from(i), Value::from(i * 10))?;
        }

        let mut partial = map.keys()?;
        assert_eq!(partial.next().transpose()?, Some(Value::from(0)));
        assert_eq!(partial.next().transpose()?, Some(Value::from(1)));

        // a fresh call starts over instead of resuming
        assert_eq!(collect_keys(&map)?.len(), 5);
        let entries: Vec<(Value, Value)> = map.entries()?.collect::<NitriteResult<_>>()?;
        assert_eq!(entries.first(), Some(&(Value::from(0), Value::from(0))));
        assert_eq!(entries.last(), Some(&(Value::from(4), Value::from(40))));
        Ok(())
    });
}

#[test]
fn test_reverse_entries() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("reverse")?;
        for k in ["b", "a", "c"] {
            map.put(key(k), Value::from(k))?;
        }

        let reversed: Vec<Value> = map
            .reverse_entries()?
            .map(|entry| entry.map(|(k, _)| k))
            .collect::<NitriteResult<_>>()?;
        assert_eq!(reversed, vec![key("c"), key("b"), key("a")]);
        Ok(())
    });
}

#[test]
fn test_iteration_ignores_later_writes() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("isolation")?;
        for i in 0..3 {
            map.put(Value::from(i), Value::from(i))?;
        }

        let reverse = map.reverse_entries()?;
        map.put(Value::from(99), Value::from(99))?;
        map.remove(&Value::from(0))?;

        let seen: Vec<Value> = reverse
            .map(|entry| entry.map(|(k, _)| k))
            .collect::<NitriteResult<_>>()?;
        assert_eq!(seen, vec![Value::from(2), Value::from(1), Value::from(0)]);
        Ok(())
    });
}

#[test]
fn test_put_if_absent() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("absent")?;
        assert_eq!(map.put_if_absent(key("k"), Value::from(1))?, None);
        assert_eq!(map.put_if_absent(key("k"), Value::from(2))?, Some(Value::from(1)));
        assert_eq!(map.get(&key("k"))?, Some(Value::from(1)));
        assert_eq!(map.size()?, 1);
        Ok(())
    });
}

#[test]
fn test_concurrent_put_if_absent_has_one_winner() {
    const CALLERS: usize = 8;

    run_on_all(|ctx| {
        let map = ctx.store().open_map("race")?;
        let barrier = Barrier::new(CALLERS);

        let results: Vec<Option<Value>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|i| {
                    let map = map.clone();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        map.put_if_absent(key("shared"), Value::from(i as i64))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("caller panicked"))
                .collect::<NitriteResult<_>>()
        })?;

        let winners: Vec<_> = results.iter().filter(|r| r.is_none()).collect();
        assert_eq!(winners.len(), 1);

        let stored = map.get(&key("shared"))?.expect("winning value stored");
        for observed in results.iter().flatten() {
            assert_eq!(observed, &stored);
        }
        assert_eq!(map.size()?, 1);
        Ok(())
    });
}

#[test]
fn test_concurrent_writers_keep_exact_size() {
    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 50;

    run_on_all(|ctx| {
        let map = ctx.store().open_map("writers")?;
        // seed the cached counter before the writers start
        assert_eq!(map.size()?, 0);

        thread::scope(|scope| {
            for w in 0..WRITERS {
                let map = map.clone();
                scope.spawn(move || {
                    for i in 0..PER_WRITER {
                        map.put(Value::from(w * 1000 + i), Value::from(i)).expect("put");
                    }
                    for i in 0..PER_WRITER / 2 {
                        map.remove(&Value::from(w * 1000 + i)).expect("remove");
                    }
                });
            }
        });

        assert_eq!(map.size()?, (WRITERS * PER_WRITER / 2) as u64);
        Ok(())
    });
}

#[test]
fn test_first_size_during_concurrent_writes() {
    const PREFILL: i64 = 5000;
    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 250;

    run_on_all(|ctx| {
        let store = ctx.store();
        let map = store.open_map("uncounted")?;
        for i in 0..PREFILL {
            map.put(Value::from(i), Value::from(i))?;
        }
        // a reopened handle has not counted its records yet
        store.close_map("uncounted")?;
        let map = store.open_map("uncounted")?;

        let first = thread::scope(|scope| {
            for w in 0..WRITERS {
                let map = map.clone();
                scope.spawn(move || {
                    for i in 0..PER_WRITER {
                        let key = PREFILL + w * PER_WRITER + i;
                        map.put(Value::from(key), Value::from(i)).expect("put");
                    }
                });
            }
            map.size()
        })?;
        assert!(first >= PREFILL as u64);

        let expected = (PREFILL + WRITERS * PER_WRITER) as u64;
        assert_eq!(collect_keys(&map)?.len() as u64, expected);
        assert_eq!(map.size()?, expected);
        Ok(())
    });
}

#[test]
fn test_clear_keeps_map_registered() {
    run_on_all(|ctx| {
        let store = ctx.store();
        let map = store.open_map("clearing")?;
        for i in 0..10 {
            map.put(Value::from(i), Value::from(i))?;
        }
        map.clear()?;

        assert_eq!(map.size()?, 0);
        assert!(map.is_empty()?);
        assert_eq!(collect_keys(&map)?, Vec::<Value>::new());
        assert!(store.has_map("clearing")?);

        map.put(Value::from(1), Value::from("again"))?;
        assert_eq!(map.size()?, 1);
        Ok(())
    });
}

#[test]
fn test_drop_is_idempotent() {
    run_on_all(|ctx| {
        let store = ctx.store();
        let map = store.open_map("dropping")?;
        for i in 0..10 {
            map.put(Value::from(i), Value::from(i))?;
        }
        store.remove_map("dropping")?;
        assert!(map.is_dropped()?);
        assert!(!store.has_map("dropping")?);

        let reopened = store.open_map("dropping")?;
        assert_eq!(reopened.size()?, 0);
        assert_eq!(reopened.first_key()?, None);

        store.remove_map("dropping")?;
        store.remove_map("dropping")?;
        assert_eq!(store.open_map("dropping")?.size()?, 0);
        Ok(())
    });
}

#[test]
fn test_operations_after_drop_fail() {
    run_on_all(|ctx| {
        let store = ctx.store();
        let map = store.open_map("gone")?;
        map.put(key("k"), Value::from(1))?;
        store.remove_map("gone")?;

        assert!(map.get(&key("k")).is_err());
        assert!(map.put(key("k"), Value::from(2)).is_err());
        Ok(())
    });
}

#[test]
fn test_last_modified_time_refreshed() {
    run_on_all(|ctx| {
        let map = ctx.store().open_map("touched")?;
        map.put(key("k"), Value::from(1))?;
        let attributes = map.attributes()?.expect("attributes written on put");
        assert!(attributes.get(LAST_MODIFIED_TIME).is_some());
        Ok(())
    });
}

#[test]
fn test_records_survive_reopen() {
    run_on(&Backend::persistent(), |ctx| {
        let map = ctx.store().open_map("durable")?;
        for i in 0..20 {
            map.put(Value::from(i), Value::from(format!("v{}", i)))?;
        }
        ctx.store().commit()?;

        let reopened = ctx.reopen()?;
        let map = reopened.store().open_map("durable")?;
        assert_eq!(map.size()?, 20);
        assert_eq!(map.get(&Value::from(7))?, Some(Value::from("v7")));
        assert!(reopened.store().map_names()?.contains("durable"));
        reopened.store().close()
    });
}

#[test]
fn test_map_names() {
    run_on_all(|ctx| {
        let store = ctx.store();
        store.open_map("first")?.put(key("k"), Value::from(1))?;
        store.open_map("second")?.put(key("k"), Value::from(1))?;

        let names = store.map_names()?;
        assert!(names.contains("first"));
        assert!(names.contains("second"));
        assert!(store.has_map("first")?);
        assert!(!store.has_map("third")?);
        Ok(())
    });
}
