use http::{Response, StatusCode};
use weir_http::handler::{Reply, make_handler};
use weir_http::protocol::body::ResponseBody;
use weir_server::{Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::builder().port(8080).build()?;

    let server = Server::builder()
        .config(config)
        .handler(make_handler(|req| {
            let body = format!("hello from {}\n", req.uri().path());
            let response = Response::builder().status(StatusCode::OK).body(ResponseBody::from(body)).unwrap();
            Ok(Reply::Ready(response))
        }))
        .build()?;

    server.run()?;
    Ok(())
}
