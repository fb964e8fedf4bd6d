//! HTTP server for the captive portal
//!
//! One connection at a time: read until the request is complete, answer
//! from the shared node, close.

use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embassy_net::Stack;
use embassy_time::Duration;
use heapless::String;
use log::{debug, info, warn};
use matrix_mesh_core::portal::{self, PortalError, Request, MAX_REQUEST_LEN, MAX_RESPONSE_LEN};

use crate::SharedNode;

const HTTP_PORT: u16 = 80;

/// Idle connections are dropped after this long
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

#[embassy_executor::task]
pub async fn http_server_task(stack: Stack<'static>, node: &'static SharedNode) {
    let mut rx_buffer = [0u8; 1536];
    let mut tx_buffer = [0u8; 1536];
    let mut request_buf = [0u8; MAX_REQUEST_LEN];
    let mut response: String<MAX_RESPONSE_LEN> = String::new();

    stack.wait_config_up().await;
    info!("HTTP server listening on port {}", HTTP_PORT);

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        if let Err(e) = socket.accept(HTTP_PORT).await {
            debug!("Accept error: {:?}", e);
            continue;
        }
        debug!("HTTP client connected: {:?}", socket.remote_endpoint());

        response.clear();
        let served = match read_request(&mut socket, &mut request_buf).await {
            Ok(len) => match Request::parse(&request_buf[..len]) {
                Ok(request) => {
                    let mut node = node.lock().await;
                    portal::respond(&request, &mut *node, &mut response)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match served {
            Ok(status) => debug!("HTTP {} ({} bytes)", status.code(), response.len()),
            Err(PortalError::Incomplete) => {
                debug!("Client went away mid-request");
                socket.close();
                continue;
            }
            Err(e) => {
                warn!("Bad request: {:?}", e);
                response.clear();
                let _ = portal::write_error(&mut response, e);
            }
        }

        if let Err(e) = write_all(&mut socket, response.as_bytes()).await {
            debug!("Write error: {:?}", e);
        }
        if let Err(e) = socket.flush().await {
            debug!("Flush error: {:?}", e);
        }
        socket.close();
    }
}

/// Read into `buf` until it holds a complete request. Returns its length.
async fn read_request(socket: &mut TcpSocket<'_>, buf: &mut [u8]) -> Result<usize, PortalError> {
    let mut len = 0;
    loop {
        if len == buf.len() {
            return Err(PortalError::TooLarge);
        }
        match socket.read(&mut buf[len..]).await {
            Ok(0) => return Err(PortalError::Incomplete),
            Ok(n) => len += n,
            Err(e) => {
                debug!("Read error: {:?}", e);
                return Err(PortalError::Incomplete);
            }
        }
        match Request::parse(&buf[..len]) {
            Err(PortalError::Incomplete) => continue,
            Err(e) => return Err(e),
            Ok(_) => return Ok(len),
        }
    }
}

async fn write_all(socket: &mut TcpSocket<'_>, mut data: &[u8]) -> Result<(), TcpError> {
    while !data.is_empty() {
        let written = socket.write(data).await?;
        if written == 0 {
            return Err(TcpError::ConnectionReset);
        }
        data = &data[written..];
    }
    Ok(())
}
