//! carechain-storage: content-addressed blob store over OpenDAL

pub mod blob;
pub mod gateway;
pub mod health;
pub mod operator;
pub mod record;

pub use blob::{address_of, address_of_file, BlobStore};
pub use gateway::gateway_url;
pub use health::check_health;
pub use operator::build_operator;
pub use record::{
    fetch_pointer, fetch_record, fetch_record_to_file, publish_record, publish_record_file,
};
