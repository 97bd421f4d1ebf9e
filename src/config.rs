/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of the [master](crate::master::Master) and of [storage nodes](crate::node::StorageNode).
//!
//! Both are built with the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     MasterConfiguration::builder()
//!     .num_nodes(4)
//!     .client_port(8080)
//!     .registration_port(9090)
//!     .log_events(true)
//!     .build()
//! ```

use std::path::PathBuf;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::types::NodeID;

/// How long the master waits for a single round trip with a storage node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long the master waits between attempts to deliver a decision to a storage node.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [MasterConfiguration]. On the builder call the following methods to construct
    a valid [MasterConfiguration].

    Required:
    - `.num_nodes(...)`

    Optional:
    - `.hostname(...)`
    - `.client_port(...)`
    - `.registration_port(...)`
    - `.cache_num_sets(...)`
    - `.cache_set_capacity(...)`
    - `.request_timeout(...)`
    - `.retry_interval(...)`
    - `.worker_threads(...)`
    - `.log_events(...)`
"))]
pub struct MasterConfiguration {
    #[builder(setter(doc = "Set the number of storage nodes the master waits for before serving requests. Must be at least 2. Required."))]
    pub num_nodes: usize,
    #[builder(default = String::from("localhost"), setter(into, doc = "Set the hostname both listeners bind to. Defaults to `localhost`."))]
    pub hostname: String,
    #[builder(default = 8080, setter(doc = "Set the port clients connect to. 0 picks a free port. Defaults to 8080."))]
    pub client_port: u16,
    #[builder(default = 9090, setter(doc = "Set the port storage nodes register on. 0 picks a free port. Defaults to 9090."))]
    pub registration_port: u16,
    #[builder(default = 100, setter(doc = "Set the number of sets in the master's read cache. Defaults to 100."))]
    pub cache_num_sets: usize,
    #[builder(default = 10, setter(doc = "Set the capacity of each set of the master's read cache. Defaults to 10."))]
    pub cache_set_capacity: usize,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT, setter(doc = "Set the timeout for a single round trip with a storage node. Defaults to 3 seconds."))]
    pub request_timeout: Duration,
    #[builder(default = DEFAULT_RETRY_INTERVAL, setter(doc = "Set the base delay between attempts to deliver a decision. Defaults to 100 milliseconds."))]
    pub retry_interval: Duration,
    #[builder(default = 8, setter(doc = "Set the number of worker threads serving each listener. Defaults to 8."))]
    pub worker_threads: usize,
    #[builder(default = false, setter(doc = "Enable event logging? Defaults to false."))]
    pub log_events: bool,
}

#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeConfiguration]. On the builder call the following methods to construct a
    valid [NodeConfiguration].

    Required:
    - `.node_id(...)`
    - `.log_path(...)`

    Optional:
    - `.hostname(...)`
    - `.port(...)`
    - `.master_hostname(...)`
    - `.master_registration_port(...)`
    - `.store_path(...)`
    - `.cache_num_sets(...)`
    - `.cache_set_capacity(...)`
    - `.compaction_threshold(...)`
    - `.request_timeout(...)`
    - `.log_events(...)`
"))]
pub struct NodeConfiguration {
    #[builder(setter(doc = "Set the node's identifier, which is also its position on the replica ring. Required."))]
    pub node_id: NodeID,
    #[builder(default = String::from("localhost"), setter(into, doc = "Set the hostname the node listens on. Defaults to `localhost`."))]
    pub hostname: String,
    #[builder(default = 0, setter(doc = "Set the port the node listens on for the master. 0 picks a free port. Defaults to 0."))]
    pub port: u16,
    #[builder(default = String::from("localhost"), setter(into, doc = "Set the hostname of the master. Defaults to `localhost`."))]
    pub master_hostname: String,
    #[builder(default = 9090, setter(doc = "Set the port the master accepts registrations on. Defaults to 9090."))]
    pub master_registration_port: u16,
    #[builder(setter(into, doc = "Set the path of the node's write-ahead log. Required."))]
    pub log_path: PathBuf,
    #[builder(default, setter(strip_option, into, doc = "Set the path of a durable store. Without it, the node keeps its data in memory and rebuilds it from the log on restart."))]
    pub store_path: Option<PathBuf>,
    #[builder(default = 100, setter(doc = "Set the number of sets in the node's cache. Defaults to 100."))]
    pub cache_num_sets: usize,
    #[builder(default = 10, setter(doc = "Set the capacity of each set of the node's cache. Defaults to 10."))]
    pub cache_set_capacity: usize,
    #[builder(default = 1024, setter(doc = "Set the number of log records above which a node with a durable store compacts its log. Defaults to 1024."))]
    pub compaction_threshold: usize,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT, setter(doc = "Set the timeout for reading a request and for registering with the master. Defaults to 3 seconds."))]
    pub request_timeout: Duration,
    #[builder(default = false, setter(doc = "Enable event logging? Defaults to false."))]
    pub log_events: bool,
}
