use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use foreman::{Config, Registry, Tools, WorkerPool};

///
/// Set-up logging and create a clean working folder under the target tmpdir.
///
pub fn init_test(folder: &str) -> PathBuf {
    dotenv::dotenv().ok();
    let _ = env_logger::builder().is_test(true).try_init();

    let base_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(folder);
    let _ = std::fs::remove_dir_all(&base_dir);
    std::fs::create_dir_all(&base_dir)
        .unwrap_or_else(|_| panic!("Cannot create base dir {}", base_dir.to_string_lossy()));

    base_dir
}

pub fn write_file(base_dir: &Path, filename: &str, contents: &str) -> PathBuf {
    let path = base_dir.join(filename);
    std::fs::write(&path, contents)
        .unwrap_or_else(|_| panic!("Cannot write test file {}", path.to_string_lossy()));
    path
}

///
/// Build a full service (config, registry, worker pool, tools) rooted in the test
/// folder. Extra yaml lines append to the generated config file.
///
pub fn service(base_dir: &Path, extra_config: &str) -> (Arc<Config>, Arc<Registry>, Tools) {
    let yaml = format!(
        "max_concurrent_tasks: 2\nresults_dir: {}\nuploads_dir: {}\n{}",
        base_dir.join("results").to_string_lossy(),
        base_dir.join("uploads").to_string_lossy(),
        extra_config);

    let config_path = base_dir.join("foreman.yaml");
    std::fs::write(&config_path, yaml).expect("cannot write test config");

    let config = Arc::new(Config::load(Some(&config_path)).expect("test config should load"));
    let registry = Arc::new(Registry::new());
    let pool = Arc::new(WorkerPool::start(config.clone(), registry.clone()));
    let tools = Tools::new(config.clone(), registry.clone(), pool);

    (config, registry, tools)
}

///
/// The standard two-sided schema used across the lifecycle tests.
///
pub fn schema_json() -> serde_json::Value {
    serde_json::json!({
        "version": "1.0",
        "sides": {
            "business": {
                "file_pattern": "business_*.csv",
                "field_roles": { "order_id": "id", "amount": "amt" }
            },
            "finance": {
                "file_pattern": "finance_*.csv",
                "field_roles": { "order_id": "id", "amount": "amt" }
            }
        },
        "key_role": "order_id",
        "tolerance": { "amount_diff_max": 0.01 }
    })
}

///
/// Generate a csv with the given number of data rows.
///
pub fn bulk_csv(rows: usize, amount: &str) -> String {
    let mut contents = String::with_capacity(rows * 16);
    contents.push_str("id,amt\n");
    for row in 0..rows {
        contents.push_str(&format!("K{:07},{}\n", row, amount));
    }
    contents
}

///
/// A loopback HTTP listener that accepts a single request, replies 200, and hands
/// the request body back through the channel. Used to observe callbacks.
///
pub fn one_shot_http_server() -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("cannot bind loopback listener");
    let addr = listener.local_addr().expect("listener has no addr");
    let (sender, receiver) = mpsc::channel();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let body = read_request_body(&mut stream);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = sender.send(body);
        }
    });

    (format!("http://{}/callback", addr), receiver)
}

///
/// Minimal HTTP request reader - headers, then content-length bytes of body.
///
fn read_request_body(stream: &mut std::net::TcpStream) -> String {
    let mut buffer = vec!();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        match stream.read(&mut chunk) {
            Ok(0) => break None,
            Ok(read) => {
                buffer.extend_from_slice(&chunk[..read]);
                if let Some(pos) = find_header_end(&buffer) {
                    break Some(pos)
                }
            },
            Err(_) => break None,
        }
    };

    let header_end = match header_end {
        Some(pos) => pos,
        None => return String::new(),
    };

    let headers = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = headers.lines()
        .find(|line| line.to_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|length| length.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => body.extend_from_slice(&chunk[..read]),
            Err(_) => break,
        }
    }

    String::from_utf8_lossy(&body).to_string()
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}
