//! Echo server: a form, an upload endpoint and a websocket echo.
//!
//! # Running This Example
//!
//! ```bash
//! RUST_LOG=debug cargo run --example echo
//! ```
//!
//! Then open <http://127.0.0.1:8080/> in a browser, or:
//!
//! ```text
//! curl 'http://127.0.0.1:8080/hello?name=you'
//! curl -F note=hi -F file=@Cargo.toml http://127.0.0.1:8080/upload
//! ```

use hearth::pages::html_escape;
use hearth::prelude::*;
use hearth::{WebSocketListener, WebSocketSender};
use log::info;
use std::io::Write;
use std::sync::Arc;

const INDEX: &str = r#"<!DOCTYPE html>
<html><head><title>hearth echo</title></head>
<body>
<h1>hearth echo</h1>
<form method="post" action="/upload" enctype="multipart/form-data">
  <input name="note"> <input type="file" name="file"> <button>Send</button>
</form>
<p><input id="line"> <button onclick="ws.send(line.value)">Echo</button></p>
<pre id="log"></pre>
<script>
  const ws = new WebSocket(`ws://${location.host}/ws`);
  ws.onmessage = (e) => { log.textContent += e.data + "\n"; };
</script>
</body></html>
"#;

struct Echo;

impl WebSocketListener for Echo {
    fn received_message(&self, sender: &WebSocketSender, message: Message) {
        if let Err(e) = sender.send(message) {
            info!("websocket {}: echo failed: {e}", sender.id());
        }
    }

    fn socket_closed(&self, sender: &WebSocketSender) {
        info!("websocket {} closed", sender.id());
    }
}

struct App;

impl Responder for App {
    fn respond(
        &self,
        request: &mut Request<'_>,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), RespondError> {
        match request.path() {
            "/" => response.send_body(INDEX.as_bytes())?,
            "/hello" => {
                let name = request.param("name").unwrap_or("world").to_string();
                response.set_header("Content-Type", "text/plain; charset=utf-8")?;
                response.do_not_cache()?;
                writeln!(response, "hello {name} from {}", request.client_addr())?;
            }
            "/upload" => {
                write!(
                    response,
                    "<p>note: {}</p>",
                    html_escape(request.form_value("note").unwrap_or(""))
                )?;
                for upload in request.uploads() {
                    write!(
                        response,
                        "<p>{} ({}, {} bytes)</p>",
                        html_escape(upload.filename()),
                        html_escape(upload.content_type()),
                        upload.len()
                    )?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn accepts_websocket(&self, request: &Request<'_>) -> bool {
        request.path() == "/ws"
    }

    fn serve_websocket(&self, _request: &Request<'_>, mut socket: WebSocket) -> Result<(), RespondError> {
        socket.add_listener(Arc::new(Echo));
        socket.spawn()?;
        Ok(())
    }
}

fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let server = Server::new(ServerConfig::new(), App).with_not_found(|request, response| {
        let page = hearth::pages::error_page(
            "404 Not Found",
            &format!("Nothing lives at {}.", request.path()),
            &hearth::pages::signature("hearth", request.host()),
        );
        response.send_body(page.as_bytes())?;
        Ok(())
    });
    info!("listening on {}", server.config().bind_addr());
    server.serve()
}
