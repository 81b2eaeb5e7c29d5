//! Streams a response body through the bounded body channel while echoing
//! the uploaded request body back chunk by chunk.

use bytes::Bytes;
use http::{Response, StatusCode};
use weir_http::handler::{Reply, make_handler};
use weir_http::protocol::body::ResponseBody;
use weir_server::{Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::builder().port(8080).inbuf(64).executor(8).build()?;

    let server = Server::builder()
        .config(config)
        .handler(make_handler(|mut req| {
            let (mut tx, body) = ResponseBody::channel(16);

            // echo on a separate thread; the handler returns immediately and
            // the writer drains the channel under backpressure
            std::thread::spawn(move || {
                while let Some(chunk) = req.body_mut().take() {
                    if tx.blocking_push(chunk).is_err() {
                        return;
                    }
                }
                if req.body().is_empty() {
                    let _ = tx.blocking_push(Bytes::from_static(b"(no body)\n"));
                }
                tx.close();
            });

            let response = Response::builder().status(StatusCode::OK).body(body).unwrap();
            Ok(Reply::Ready(response))
        }))
        .build()?;

    server.run()?;
    Ok(())
}
