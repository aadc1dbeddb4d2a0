//! Command scenarios: callback executors, polling executors with
//! wait/ack, timeout semantics, and the in-process fallback path for
//! backends without a command implementation.

use anyhow::Result;
use ioc_runtime::link::LinkObj;
use ioc_runtime::service::ServiceObj;
use ioc_runtime::{
    Capabilities, CmdCallback, CmdDesc, CmdExecutorArgs, CmdStatus, ConnArgs, ConnState,
    IocError, IocRuntime, IocUri, LinkId, LinkSubState, Options, ProtocolBackend, ServiceArgs,
    Usage, UsageArgs,
};
use std::sync::Arc;
use std::time::Duration;

fn wait_opts() -> Options {
    Options::new().timeout_us(2_000_000)
}

fn connect_in_background(
    ioc: &Arc<IocRuntime>,
    args: ConnArgs,
) -> std::thread::JoinHandle<ioc_runtime::Result<LinkId>> {
    let ioc = ioc.clone();
    std::thread::spawn(move || ioc.connect_service(&args, &wait_opts()))
}

/// Bring up a command service and one connected initiator/executor pair.
fn command_pair(
    ioc: &Arc<IocRuntime>,
    path: &str,
    executor: Option<CmdCallback>,
) -> Result<(ioc_runtime::ServiceId, LinkId, LinkId)> {
    let mut args = ServiceArgs::new(IocUri::auto(path), Capabilities::of(&[Usage::CmdExecutor]));
    args.usage_args = UsageArgs {
        cmd: Some(CmdExecutorArgs {
            cmd_ids: vec![0xD0],
            callback: executor,
        }),
        ..UsageArgs::default()
    };
    let srv = ioc.online_service(&args)?;

    let client = connect_in_background(ioc, ConnArgs::new(IocUri::auto(path), Usage::CmdInitiator));
    let exec_link = ioc.accept_client(srv, &wait_opts())?;
    let init_link = client.join().unwrap()?;
    Ok((srv, init_link, exec_link))
}

/// Callback-executor round trip: the payload crosses both ways, the
/// initiator sees a successful terminal status, and an id outside the
/// executor's set is refused.
#[test]
fn exec_cmd_callback_roundtrip() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);

    let echo: CmdCallback = Arc::new(|_link, desc: &mut CmdDesc| {
        assert_eq!(desc.status, CmdStatus::Processing);
        desc.output = match desc.input.as_slice() {
            b"ping" => b"pong".to_vec(),
            other => other.to_vec(),
        };
        Ok(())
    });
    let (srv, init_link, _exec_link) = command_pair(&ioc, "cmd", Some(echo))?;

    let mut desc = CmdDesc::new(0xD0).with_input(b"ping".to_vec());
    ioc.exec_cmd(init_link, &mut desc, &Options::new().timeout_us(1_000_000))?;
    assert_eq!(desc.status, CmdStatus::Success);
    assert_eq!(desc.result, 0);
    assert_eq!(desc.output, b"pong");

    // A command id the executor never registered.
    let mut unknown = CmdDesc::new(0xDF);
    assert_eq!(
        ioc.exec_cmd(init_link, &mut unknown, &Options::new().timeout_us(1_000_000))
            .unwrap_err(),
        IocError::NotSupport
    );

    ioc.offline_service(srv)?;
    Ok(())
}

/// A failing executor callback surfaces as CmdExecFailed with a Failed
/// terminal status on the initiator's descriptor.
#[test]
fn exec_cmd_executor_failure() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let failing: CmdCallback = Arc::new(|_link, _desc: &mut CmdDesc| Err(IocError::CmdExecFailed));
    let (srv, init_link, _exec_link) = command_pair(&ioc, "cmd", Some(failing))?;

    let mut desc = CmdDesc::new(0xD0);
    assert_eq!(
        ioc.exec_cmd(init_link, &mut desc, &wait_opts()).unwrap_err(),
        IocError::CmdExecFailed
    );
    assert_eq!(desc.status, CmdStatus::Failed);

    ioc.offline_service(srv)?;
    Ok(())
}

/// Polling executor: wait_cmd blocks until the initiator submits, the link
/// holds the waiting sub-state until ack_cmd, and the acknowledged output
/// reaches the blocked initiator.
#[test]
fn exec_cmd_polling_roundtrip() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, init_link, exec_link) = command_pair(&ioc, "poll", None)?;

    let executor_ioc = ioc.clone();
    let executor = std::thread::spawn(move || -> ioc_runtime::Result<()> {
        let mut cmd = executor_ioc.wait_cmd(exec_link, &wait_opts())?;
        assert_eq!(cmd.status, CmdStatus::Processing);
        assert_eq!(cmd.input, b"work".to_vec());

        // Until the ack, the link reports the held command.
        let (_, sub) = executor_ioc.link_state(exec_link)?;
        assert_eq!(sub, LinkSubState::CmdExecutorBusyWaitCmd);

        cmd.output = b"done".to_vec();
        executor_ioc.ack_cmd(exec_link, &cmd, &Options::new())?;

        let (_, sub) = executor_ioc.link_state(exec_link)?;
        assert_eq!(sub, LinkSubState::CmdExecutorReady);
        Ok(())
    });

    let mut desc = CmdDesc::new(0xD0).with_input(b"work".to_vec());
    ioc.exec_cmd(init_link, &mut desc, &wait_opts())?;
    assert_eq!(desc.status, CmdStatus::Success);
    assert_eq!(desc.output, b"done");

    executor.join().unwrap()?;
    ioc.offline_service(srv)?;
    Ok(())
}

/// Timeout semantics: an unserved exec_cmd expires with a Timeout terminal
/// status, after which the runtime no longer tracks the command — a late
/// acknowledgement fails.
#[test]
fn exec_cmd_timeout_and_late_ack() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, init_link, exec_link) = command_pair(&ioc, "slow", None)?;

    let mut desc = CmdDesc::new(0xD0);
    assert_eq!(
        ioc.exec_cmd(init_link, &mut desc, &Options::new().timeout_us(50_000))
            .unwrap_err(),
        IocError::Timeout
    );
    assert_eq!(desc.status, CmdStatus::Timeout);

    // The descriptor is still in the executor's inbox; completing it now
    // cannot reach the departed initiator.
    let stale = ioc.wait_cmd(exec_link, &Options::nonblock())?;
    assert_eq!(
        ioc.ack_cmd(exec_link, &stale, &Options::new()).unwrap_err(),
        IocError::AckCmdFailed
    );

    ioc.offline_service(srv)?;
    Ok(())
}

/// Polling-path edges: nothing pending is distinguishable from an expired
/// bounded wait, and acknowledging an untracked descriptor fails.
#[test]
fn wait_and_ack_edges() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, init_link, exec_link) = command_pair(&ioc, "edges", None)?;

    assert_eq!(
        ioc.wait_cmd(exec_link, &Options::nonblock()).unwrap_err(),
        IocError::NoCmdPending
    );
    assert_eq!(
        ioc.wait_cmd(exec_link, &Options::new().timeout_us(30_000)).unwrap_err(),
        IocError::Timeout
    );
    assert_eq!(
        ioc.ack_cmd(exec_link, &CmdDesc::new(0xD0), &Options::new()).unwrap_err(),
        IocError::AckCmdFailed
    );

    // Role checks: the initiator cannot wait, the executor cannot exec.
    assert_eq!(
        ioc.wait_cmd(init_link, &Options::nonblock()).unwrap_err(),
        IocError::IncompatibleUsage
    );
    assert_eq!(
        ioc.exec_cmd(exec_link, &mut CmdDesc::new(0xD0), &Options::nonblock())
            .unwrap_err(),
        IocError::IncompatibleUsage
    );

    ioc.offline_service(srv)?;
    Ok(())
}

/// A second exec_cmd on a link whose initiator is still blocked reports
/// Busy instead of queueing behind it.
#[test]
fn exec_cmd_busy_while_in_flight() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, init_link, _exec_link) = command_pair(&ioc, "busy", None)?;

    let first_ioc = ioc.clone();
    let first = std::thread::spawn(move || {
        let mut desc = CmdDesc::new(0xD0);
        first_ioc.exec_cmd(init_link, &mut desc, &Options::new().timeout_us(500_000))
    });

    // Give the first call time to enter its blocking wait.
    std::thread::sleep(Duration::from_millis(100));
    let mut desc = CmdDesc::new(0xD0);
    assert_eq!(
        ioc.exec_cmd(init_link, &mut desc, &Options::nonblock()).unwrap_err(),
        IocError::Busy
    );

    assert_eq!(first.join().unwrap().unwrap_err(), IocError::Timeout);
    ioc.offline_service(srv)?;
    Ok(())
}

/// A connected peer exposing no command record at all.
#[test]
fn exec_cmd_without_executor() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    // CmdExecutor capability but no usage args: the role exists, nobody
    // fills it.
    let srv = ioc.online_service(&ServiceArgs::new(
        IocUri::auto("hollow"),
        Capabilities::of(&[Usage::CmdExecutor]),
    ))?;
    let client = connect_in_background(&ioc, ConnArgs::new(IocUri::auto("hollow"), Usage::CmdInitiator));
    let _exec_link = ioc.accept_client(srv, &wait_opts())?;
    let init_link = client.join().unwrap()?;

    let mut desc = CmdDesc::new(0xD0);
    assert_eq!(
        ioc.exec_cmd(init_link, &mut desc, &wait_opts()).unwrap_err(),
        IocError::NoCmdExecutor
    );
    ioc.offline_service(srv)?;
    Ok(())
}

/// A minimal transport that pairs nothing and implements no message path;
/// commands must flow through the facade's in-process fallback.
struct RelayBackend;

impl ProtocolBackend for RelayBackend {
    fn name(&self) -> &'static str {
        "relay"
    }
    fn online_service(&self, _service: &Arc<ServiceObj>) -> ioc_runtime::Result<()> {
        Ok(())
    }
    fn offline_service(&self, _service: &Arc<ServiceObj>) -> ioc_runtime::Result<()> {
        Ok(())
    }
    fn accept_client(
        &self,
        _service: &Arc<ServiceObj>,
        link: &Arc<LinkObj>,
        _options: &Options,
    ) -> ioc_runtime::Result<()> {
        link.set_conn_state(ConnState::Connected);
        Ok(())
    }
    fn connect_service(&self, link: &Arc<LinkObj>, _options: &Options) -> ioc_runtime::Result<()> {
        link.set_conn_state(ConnState::Connected);
        Ok(())
    }
    fn close_link(&self, link: &Arc<LinkObj>) -> ioc_runtime::Result<()> {
        link.set_conn_state(ConnState::Disconnected);
        Ok(())
    }
}

/// With a backend that leaves exec_cmd unimplemented, the facade falls back
/// to scanning the live link table for the opposite-role link on the same
/// path and running its executor callback directly.
#[test]
fn exec_cmd_fallback_path() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    ioc.register_backend(Arc::new(RelayBackend))?;

    let doubler: CmdCallback = Arc::new(|_link, desc: &mut CmdDesc| {
        desc.output = desc.input.iter().map(|b| b.wrapping_mul(2)).collect();
        Ok(())
    });
    let mut args = ServiceArgs::new(
        IocUri::parse("relay://localprocess/fb")?,
        Capabilities::of(&[Usage::CmdExecutor]),
    );
    args.usage_args.cmd = Some(CmdExecutorArgs {
        cmd_ids: vec![0xD0],
        callback: Some(doubler),
    });
    let srv = ioc.online_service(&args)?;

    // Relay accepts and connects without a rendezvous.
    let _exec_link = ioc.accept_client(srv, &Options::nonblock())?;
    let init_link = ioc.connect_service(
        &ConnArgs::new(IocUri::parse("relay://localprocess/fb")?, Usage::CmdInitiator),
        &Options::nonblock(),
    )?;

    let mut desc = CmdDesc::new(0xD0).with_input(vec![1, 2, 3]);
    ioc.exec_cmd(init_link, &mut desc, &wait_opts())?;
    assert_eq!(desc.status, CmdStatus::Success);
    assert_eq!(desc.output, vec![2, 4, 6]);

    // The fallback honors the executor's supported-id set.
    let mut unknown = CmdDesc::new(0xEE);
    assert_eq!(
        ioc.exec_cmd(init_link, &mut unknown, &wait_opts()).unwrap_err(),
        IocError::NotSupport
    );

    ioc.offline_service(srv)?;
    Ok(())
}
