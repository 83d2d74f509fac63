#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cache_client::{CacheClient, ClientConfig, PoolConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client settings tuned for tests: one idle connection, short backoff.
pub fn test_config(addr: &str) -> ClientConfig {
    let mut pool = PoolConfig::new(addr, 1, Duration::from_secs(5));
    pool.connect_timeout = Some(Duration::from_secs(1));
    pool.read_timeout = Some(Duration::from_secs(2));
    pool.write_timeout = Some(Duration::from_secs(2));
    pool.retry.backoff = Duration::from_millis(20);
    ClientConfig {
        pool,
        ..ClientConfig::default()
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Shared {
    store: Mutex<HashMap<Vec<u8>, Entry>>,
    log: Mutex<Vec<String>>,
    accepted: AtomicUsize,
    failing_pings: AtomicUsize,
    scan_page: AtomicUsize,
}

/// In-memory RESP2 store speaking the subset of commands the client uses.
pub struct FakeServer {
    addr: String,
    shared: Arc<Shared>,
}

impl FakeServer {
    pub fn spawn() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let shared = Arc::new(Shared::default());
        shared.scan_page.store(10, Ordering::SeqCst);

        let accept_shared = shared.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                let conn_shared = accept_shared.clone();
                thread::spawn(move || serve(stream, conn_shared));
            }
        });

        FakeServer { addr, shared }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn config(&self) -> ClientConfig {
        test_config(&self.addr)
    }

    pub fn client(&self) -> CacheClient {
        CacheClient::open(self.config()).expect("client")
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Makes the next `count` PINGs answer with an error reply.
    pub fn fail_next_pings(&self, count: usize) {
        self.shared.failing_pings.store(count, Ordering::SeqCst);
    }

    /// Keys examined per SCAN step when the client sends no COUNT.
    pub fn set_scan_page(&self, size: usize) {
        self.shared.scan_page.store(size, Ordering::SeqCst);
    }

    /// Upper-cased command names in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.commands().iter().filter(|cmd| cmd.as_str() == name).count()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let store = self.shared.store.lock().unwrap();
        store
            .get(key.as_bytes())
            .is_some_and(|entry| entry.expires_at.map_or(true, |at| at > Instant::now()))
    }
}

fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut writer = stream;
    let mut queued: Option<Vec<Vec<Vec<u8>>>> = None;

    while let Ok(Some(args)) = read_command(&mut reader) {
        if args.is_empty() {
            break;
        }
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        shared.log.lock().unwrap().push(name.clone());

        let reply = if name == "MULTI" && queued.is_none() {
            queued = Some(Vec::new());
            simple("OK")
        } else if name == "EXEC" {
            match queued.take() {
                Some(commands) => array(commands.iter().map(|cmd| shared.execute(cmd)).collect()),
                None => error("ERR EXEC without MULTI"),
            }
        } else if let Some(commands) = queued.as_mut() {
            commands.push(args);
            simple("QUEUED")
        } else {
            shared.execute(&args)
        };

        if writer.write_all(&reply).and_then(|()| writer.flush()).is_err() {
            break;
        }
    }
}

impl Shared {
    fn execute(&self, args: &[Vec<u8>]) -> Vec<u8> {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        store.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));

        match (name.as_str(), args.len()) {
            ("PING", 1) => {
                let failing = self
                    .failing_pings
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    error("LOADING dataset in memory")
                } else {
                    simple("PONG")
                }
            }
            ("GET", 2) => bulk(store.get(&args[1]).map(|entry| entry.value.as_slice())),
            ("SET", 3) => {
                store.insert(args[1].clone(), Entry { value: args[2].clone(), expires_at: None });
                simple("OK")
            }
            ("SETEX", 4) => match parse_int(&args[2]) {
                Some(secs) if secs > 0 => {
                    store.insert(
                        args[1].clone(),
                        Entry {
                            value: args[3].clone(),
                            expires_at: Some(now + Duration::from_secs(secs as u64)),
                        },
                    );
                    simple("OK")
                }
                _ => error("ERR invalid expire time in 'setex' command"),
            },
            ("MGET", n) if n >= 2 => array(
                args[1..]
                    .iter()
                    .map(|key| bulk(store.get(key).map(|entry| entry.value.as_slice())))
                    .collect(),
            ),
            ("MSET", n) if n >= 3 && n % 2 == 1 => {
                for pair in args[1..].chunks(2) {
                    store.insert(pair[0].clone(), Entry { value: pair[1].clone(), expires_at: None });
                }
                simple("OK")
            }
            ("DEL", n) if n >= 2 => {
                let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
                integer(removed as i64)
            }
            ("EXISTS", n) if n >= 2 => {
                integer(args[1..].iter().filter(|key| store.contains_key(*key)).count() as i64)
            }
            ("TTL", 2) => match store.get(&args[1]) {
                None => integer(-2),
                Some(Entry { expires_at: None, .. }) => integer(-1),
                Some(Entry { expires_at: Some(at), .. }) => {
                    let ms = at.saturating_duration_since(now).as_millis() as i64;
                    integer((ms + 500) / 1000)
                }
            },
            ("EXPIRE", 3) => match (parse_int(&args[2]), store.get_mut(&args[1])) {
                (Some(secs), Some(entry)) if secs > 0 => {
                    entry.expires_at = Some(now + Duration::from_secs(secs as u64));
                    integer(1)
                }
                (Some(_), None) => integer(0),
                _ => error("ERR invalid expire time"),
            },
            ("SCAN", n) if n >= 2 => self.scan(&store, args),
            _ => error("ERR unknown command"),
        }
    }

    fn scan(&self, store: &HashMap<Vec<u8>, Entry>, args: &[Vec<u8>]) -> Vec<u8> {
        let Some(cursor) = parse_int(&args[1]) else {
            return error("ERR invalid cursor");
        };
        let mut pattern: &[u8] = b"*";
        let mut count = self.scan_page.load(Ordering::SeqCst);
        for option in args[2..].chunks(2) {
            match (option[0].to_ascii_uppercase().as_slice(), option.get(1)) {
                (b"MATCH", Some(value)) => pattern = value.as_slice(),
                (b"COUNT", Some(value)) => count = parse_int(value).unwrap_or(10) as usize,
                _ => return error("ERR syntax error"),
            }
        }

        let mut keys: Vec<&Vec<u8>> = store.keys().collect();
        keys.sort();
        let start = (cursor as usize).min(keys.len());
        let end = (start + count.max(1)).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end };

        let matched = keys[start..end]
            .iter()
            .filter(|key| glob_match(pattern, key))
            .map(|key| bulk(Some(key.as_slice())))
            .collect();
        array(vec![bulk(Some(next.to_string().as_bytes())), array(matched)])
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(a), Some(b)) if a == b => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

/// Spawns a server that answers PING itself and hands every other command
/// to `handler`. Each accepted connection is served on its own thread.
pub fn spawn_scripted<F>(handler: F) -> String
where
    F: Fn(&[Vec<u8>], &mut TcpStream) + Send + Sync + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let handler = Arc::new(handler);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let handler = handler.clone();
            thread::spawn(move || {
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                while let Ok(Some(args)) = read_command(&mut reader) {
                    if args.first().is_some_and(|cmd| cmd.as_slice() == b"PING") {
                        write_reply(&mut stream, &simple("PONG"));
                    } else {
                        (*handler)(args.as_slice(), &mut stream);
                    }
                }
            });
        }
    });

    addr
}

/// Spawns a server that accepts connections and never replies.
pub fn spawn_silent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            held.push(stream);
        }
    });
    addr
}

pub fn write_reply(stream: &mut TcpStream, reply: &[u8]) {
    let _ = stream.write_all(reply);
    let _ = stream.flush();
}

pub fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| invalid("eof"))?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(invalid("missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn invalid(msg: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn parse_int(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

pub fn simple(msg: &str) -> Vec<u8> {
    format!("+{msg}\r\n").into_bytes()
}

pub fn error(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

pub fn integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

pub fn bulk(data: Option<&[u8]>) -> Vec<u8> {
    match data {
        Some(data) => {
            let mut out = format!("${}\r\n", data.len()).into_bytes();
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
            out
        }
        None => b"$-1\r\n".to_vec(),
    }
}

pub fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(&item);
    }
    out
}
