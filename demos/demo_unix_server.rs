use std::path::PathBuf;

use bytes::BytesMut;
use monoio::{
    io::{AsyncReadRent, AsyncWriteRentExt, Splitable},
    net::{UnixListener, UnixStream},
};

const UDS_PATH: &str = "./uds.sock";

fn response(path: &str) -> Vec<u8> {
    let body = format!("{{\"path\":\"{path}\"}}");
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/json\r\nX-Requested-Path: {path}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

// One request per read is enough for the demo client.
async fn handle(stream: UnixStream) -> Result<(), std::io::Error> {
    let (mut read, mut write) = stream.into_split();
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        let (res, buf) = read.read(buffer).await;
        let n = res?;
        if n == 0 {
            return Ok(());
        }
        let head = String::from_utf8_lossy(&buf[..n]).into_owned();
        println!("read: {}", head.lines().next().unwrap_or_default());
        let path = head.split(' ').nth(1).unwrap_or("/").to_owned();
        let (res, _) = write.write_all(response(&path)).await;
        res?;
        buffer = buf;
        buffer.clear();
    }
}

#[monoio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = PathBuf::from(UDS_PATH);
    let _ = std::fs::remove_file(&path);
    println!("listen on {:?}", path);
    let listener = UnixListener::bind(&path)?;
    loop {
        let stream = { listener.accept().await? }.0;
        monoio::spawn(async move {
            let _ = handle(stream).await;
        });
    }
}
