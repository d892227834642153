//! Work items carried by the dispatch queue

use std::path::PathBuf;
use tokio::sync::oneshot;

use super::callbacks::EngineCallback;
use crate::data_structures::{
    Account, Address, Amount, Backend, EngineHandle, FeeBasis, ManagerHandle, Network,
    TransferPath, WalletPath,
};
use crate::engine::SubmitAuth;
use crate::errors::{QueryError, WalletSystemResult};
use crate::events::EventListener;
use crate::query::{QueryRequest, QueryResponse, RequestId};
use crate::records::ManagerMode;

pub(crate) type Reply<T> = oneshot::Sender<WalletSystemResult<T>>;

/// Application requests, answered once the dispatch task has applied them
pub(crate) enum AppCommand {
    CreateManager {
        account: Account,
        network: Network,
        mode: ManagerMode,
        storage_path: PathBuf,
        reply: Reply<ManagerHandle>,
    },
    CreateWallet {
        manager: ManagerHandle,
        currency: String,
        reply: Reply<WalletPath>,
    },
    Connect {
        manager: ManagerHandle,
        reply: Reply<()>,
    },
    Disconnect {
        manager: ManagerHandle,
        reply: Reply<()>,
    },
    Sync {
        manager: ManagerHandle,
        reply: Reply<()>,
    },
    SetMode {
        manager: ManagerHandle,
        mode: ManagerMode,
        reply: Reply<()>,
    },
    CreateTransfer {
        wallet: WalletPath,
        target: Address,
        amount: Amount,
        fee_basis: Option<FeeBasis>,
        reply: Reply<TransferPath>,
    },
    SubmitTransfer {
        transfer: TransferPath,
        auth: SubmitAuth,
        reply: Reply<()>,
    },
}

impl AppCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            AppCommand::CreateManager { .. } => "create_manager",
            AppCommand::CreateWallet { .. } => "create_wallet",
            AppCommand::Connect { .. } => "connect",
            AppCommand::Disconnect { .. } => "disconnect",
            AppCommand::Sync { .. } => "sync",
            AppCommand::SetMode { .. } => "set_mode",
            AppCommand::CreateTransfer { .. } => "create_transfer",
            AppCommand::SubmitTransfer { .. } => "submit_transfer",
        }
    }
}

pub(crate) enum DispatchCommand {
    Engine {
        backend: Backend,
        callback: EngineCallback,
    },
    App(AppCommand),
    QueryCompleted {
        backend: Backend,
        manager: EngineHandle,
        request_id: RequestId,
        request: QueryRequest,
        result: Result<QueryResponse, QueryError>,
    },
    RegisterListener {
        listener: Box<dyn EventListener>,
        reply: Reply<()>,
    },
    RemoveListener {
        name: String,
        reply: Reply<()>,
    },
    /// Answered after every earlier command's events reached all listeners
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

impl DispatchCommand {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            DispatchCommand::Engine { callback, .. } => callback.kind(),
            DispatchCommand::App(command) => command.name(),
            DispatchCommand::QueryCompleted { .. } => "query_completed",
            DispatchCommand::RegisterListener { .. } => "register_listener",
            DispatchCommand::RemoveListener { .. } => "remove_listener",
            DispatchCommand::Flush { .. } => "flush",
            DispatchCommand::Shutdown { .. } => "shutdown",
        }
    }
}
