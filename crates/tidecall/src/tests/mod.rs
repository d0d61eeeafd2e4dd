mod support;
mod websocket_transport;
