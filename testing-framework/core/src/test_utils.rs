use std::{
    collections::HashMap,
    fs,
    net::SocketAddr,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader},
    net::{TcpListener, TcpStream},
    sync::Notify,
    task::JoinHandle,
};

use crate::config::{HarnessConfig, Timeouts};

/// A chain daemon that loads, announces itself and idles until signalled.
pub const FAKE_CHAIN_DAEMON: &str = r#"
for arg in "$@"; do
  case "$arg" in -datadir=*) datadir="${arg#-datadir=}" ;; esac
done
mkdir -p "$datadir/regtest"
echo "LBRYcrd version v0.12.4.1"
echo "keypool reserve 1"
echo "init message: Done loading"
exec sleep 600
"#;

pub const FAILING_CHAIN_DAEMON: &str = r#"
echo "Error: Cannot obtain a lock on data directory"
exec sleep 600
"#;

/// A chain CLI keeping its state (height, tx counter, claims) in the data dir.
/// Every invocation is appended to `regtest/calls`.
pub const FAKE_CHAIN_CLI: &str = r#"
datadir=
while [ $# -gt 0 ]; do
  case "$1" in
    -datadir=*) datadir="${1#-datadir=}"; shift ;;
    -*) shift ;;
    *) break ;;
  esac
done
cmd="$1"; shift
state="$datadir/regtest"
mkdir -p "$state"
echo "$cmd $*" >> "$state/calls"

next_txid() {
  n=$(cat "$state/txcount" 2>/dev/null || echo 0)
  n=$((n + 1))
  echo "$n" > "$state/txcount"
  printf 'f%063d\n' "$n"
}

case "$cmd" in
  getblockcount)
    cat "$state/height" 2>/dev/null || echo 0
    ;;
  generate)
    height=$(cat "$state/height" 2>/dev/null || echo 0)
    out="["
    sep=""
    i=0
    while [ "$i" -lt "$1" ]; do
      i=$((i + 1))
      height=$((height + 1))
      out="$out$sep\"$(printf '%064d' "$height")\""
      sep=","
    done
    echo "$height" > "$state/height"
    echo "$out]"
    ;;
  sendtoaddress|supportclaim|abandonclaim)
    next_txid
    ;;
  claimname)
    txid=$(next_txid)
    mkdir -p "$datadir/claims"
    printf '{"name":"%s","value":"%s","amount":%s,"txid":"%s"}\n' "$1" "$2" "$3" "$txid" >> "$datadir/claims/$1"
    echo "$txid"
    ;;
  getclaimsforname)
    if [ -f "$datadir/claims/$1" ]; then
      echo "{\"claims\":[$(paste -sd, "$datadir/claims/$1")]}"
    else
      echo '{"claims":[]}'
    fi
    ;;
  getclaimsfortx)
    echo '[]'
    ;;
  getnameproof)
    if [ "$1" = "@unclaimed" ]; then
      echo "error: name not found" >&2
      exit 1
    fi
    printf '{"name":"%s","blockhash":"%s"}\n' "$1" "${2:-}"
    ;;
  getrawtransaction)
    echo "{\"txid\":\"$1\",\"confirmations\":0}"
    ;;
  validateaddress)
    echo "error: Invalid address" >&2
    exit 5
    ;;
  *)
    echo "error: unknown command $cmd" >&2
    exit 1
    ;;
esac
"#;

/// An executable that idles until signalled.
pub const IDLE_DAEMON: &str = "exec sleep 600\n";

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A bin dir holding the fake chain daemon and CLI.
pub fn fake_chain_bin_dir(daemon: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "lbrycrdd", daemon);
    write_script(dir.path(), "lbrycrd-cli", FAKE_CHAIN_CLI);
    dir
}

/// Defaults pointed at `bin_dir` and `data_dir`, with budgets sized for tests.
pub fn test_config(bin_dir: &Path, data_dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default()
        .with_verbose(true)
        .with_bin_dir(bin_dir)
        .with_data_dir(data_dir);
    config.timeouts = Timeouts {
        process_ready: Duration::from_secs(10),
        process_exit: Duration::from_secs(5),
        transport: Duration::from_secs(5),
        session: Duration::from_secs(5),
        rpc: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
    };
    config.client.heartbeat_interval = Duration::from_millis(50);
    config.chain.download_missing = false;
    config
}

/// A port nothing listens on at the time of the call.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

type Handler = dyn Fn(&RecordedRequest) -> (u16, Vec<u8>) + Send + Sync;

/// Minimal HTTP/1.1 server answering every request through `handler`.
pub struct MockHttp {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    accept: JoinHandle<()>,
}

impl MockHttp {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, Vec<u8>) + Send + Sync + 'static,
    {
        Self::listen("127.0.0.1:0", Arc::new(Notify::new()), handler).await
    }

    /// Serves on `bind` until `shutdown` is notified, then closes the port.
    pub async fn listen<F>(bind: &str, shutdown: Arc<Notify>, handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (u16, Vec<u8>) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let accept = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve(stream, Arc::clone(&handler), Arc::clone(&recorded)));
                    }
                }
            }
        });

        Self {
            addr,
            requests,
            accept,
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttp {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(
    stream: TcpStream,
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_owned();
        let path = parts.next().unwrap_or_default().to_owned();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
            }
        }

        let length = headers
            .get("content-length")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let request = RecordedRequest {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        };
        let (status, payload) = handler(&request);
        requests.lock().unwrap().push(request);

        let head = format!(
            "HTTP/1.1 {status} MOCK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
            payload.len()
        );
        let stream = reader.get_mut();
        if stream.write_all(head.as_bytes()).await.is_err()
            || stream.write_all(&payload).await.is_err()
        {
            return;
        }
    }
}

/// Line-delimited JSON server answering each request through `handler`.
///
/// Requests are returned to the handler parsed; the reply is echoed back with
/// the request's id.
pub async fn mock_stratum<F>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(&str, &serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                    let method = request["method"].as_str().unwrap_or_default();
                    let result = handler(method, &request["params"]);
                    let reply = serde_json::json!({"id": request["id"], "result": result});
                    let mut encoded = reply.to_string();
                    encoded.push('\n');
                    if write.write_all(encoded.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    (addr, task)
}
