//! Run `demo_unix_server` first, then this.
use monoio_unixsocket::{http::collect_body, Session};

const UDS_PATH: &str = "./uds.sock";

#[monoio::main(enable_timer = true)]
async fn main() -> Result<(), monoio_unixsocket::Error> {
    let socket = std::fs::canonicalize(UDS_PATH)?;
    let encoded = urlencoding::encode(&socket.to_string_lossy()).into_owned();
    let session = Session::new();

    for url in [
        format!("http+unix://{encoded}/get?x=1"),
        format!("http://sock.local{}/status", socket.display()),
    ] {
        let resp = session.get(url.as_str()).send().await?;
        assert_eq!(200, resp.status());
        let (header, body) = resp.into_parts();
        println!("resp header: {:?}", header);
        println!("resp body: {}", String::from_utf8_lossy(&collect_body(body).await?));
    }

    let pool = session.get_adapter("http+unix://")?.pool().clone();
    println!("idle connections: {}", pool.get_idle_connection_count());
    Ok(())
}
