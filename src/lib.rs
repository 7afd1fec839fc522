pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod state;

pub mod models {
    pub mod auth;
    pub mod event;
    pub mod session;
    pub mod task;
    pub mod timers;
}

pub mod repositories {
    pub mod dash;
    pub mod session;
    pub mod task;
}

pub mod services {
    pub mod coordinator;
}

pub mod handlers {
    pub mod ws;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod client;
