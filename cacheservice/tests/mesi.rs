//! §8 end-to-end scenario 6: three cache nodes coordinate through `cache_read`/`cache_invalidate`
//! RPCs over real loopback TCP connections (no mocking of `transport`).

use std::net::TcpListener;
use std::time::Duration;

use cacheservice::{CacheEngine, CacheEngineConfig};
use transport::Peer;

fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[test]
fn write_invalidates_peers_and_subsequent_read_fetches_the_new_value() {
    let addr_a = reserve_addr();
    let addr_b = reserve_addr();
    let addr_c = reserve_addr();

    let peer = |id: &str, addr: &str| Peer {
        id: id.to_string(),
        address: addr.to_string(),
    };

    let a = CacheEngine::start(
        "a".to_string(),
        addr_a.clone(),
        vec![peer("b", &addr_b), peer("c", &addr_c)],
        CacheEngineConfig::default(),
    )
    .unwrap();
    let b = CacheEngine::start(
        "b".to_string(),
        addr_b.clone(),
        vec![peer("a", &addr_a), peer("c", &addr_c)],
        CacheEngineConfig::default(),
    )
    .unwrap();
    let c = CacheEngine::start(
        "c".to_string(),
        addr_c.clone(),
        vec![peer("a", &addr_a), peer("b", &addr_b)],
        CacheEngineConfig::default(),
    )
    .unwrap();

    // Let the TCP listeners come up.
    std::thread::sleep(Duration::from_millis(100));

    a.put("k", b"1".to_vec());
    let (value, state) = b.get("k");
    assert_eq!(value, Some(b"1".to_vec()));
    assert_eq!(state, cacheservice::CacheState::Shared);

    c.put("k", b"2".to_vec());
    let (value, state) = a.get("k");
    assert_eq!(value, Some(b"2".to_vec()));
    assert_eq!(state, cacheservice::CacheState::Shared);
}
