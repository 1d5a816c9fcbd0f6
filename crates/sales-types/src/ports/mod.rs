pub mod api_transport;
