//! Data-path scenarios: polling receive, push delivery through a receiver
//! callback, zero-data rejection, flow control, and broken-link reporting.

use anyhow::Result;
use crossbeam::channel::bounded;
use ioc_runtime::{
    defaults, Capabilities, ConnArgs, DatCallback, DatDesc, DatReceiverArgs, DatStatus, IocError,
    IocRuntime, IocUri, LinkId, Options, ServiceArgs, Usage, UsageArgs,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

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

/// Bring up a data-receiver service and one connected sender/receiver pair.
fn data_pair(
    ioc: &Arc<IocRuntime>,
    path: &str,
    receiver: Option<DatCallback>,
) -> Result<(ioc_runtime::ServiceId, LinkId, LinkId)> {
    let mut args = ServiceArgs::new(IocUri::auto(path), Capabilities::of(&[Usage::DatReceiver]));
    args.usage_args = UsageArgs {
        dat: Some(DatReceiverArgs { callback: receiver }),
        ..UsageArgs::default()
    };
    let srv = ioc.online_service(&args)?;

    let client = connect_in_background(ioc, ConnArgs::new(IocUri::auto(path), Usage::DatSender));
    let recv_link = ioc.accept_client(srv, &wait_opts())?;
    let send_link = client.join().unwrap()?;
    Ok((srv, send_link, recv_link))
}

/// Polling path: payloads cross in order through the bounded inbox, an
/// empty inbox distinguishes a poll from an expired bounded wait, and the
/// receive marks the descriptor Received.
#[test]
fn send_and_recv_polling() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, send_link, recv_link) = data_pair(&ioc, "stream", None)?;

    for chunk in [b"alpha".as_slice(), b"beta".as_slice(), b"gamma".as_slice()] {
        ioc.send_dat(send_link, &DatDesc::new(chunk.to_vec()), &Options::new())?;
    }
    for expected in [b"alpha".as_slice(), b"beta".as_slice(), b"gamma".as_slice()] {
        let got = ioc.recv_dat(recv_link, &Options::nonblock())?;
        assert_eq!(got.payload, expected);
        assert_eq!(got.status, DatStatus::Received);
    }

    assert_eq!(
        ioc.recv_dat(recv_link, &Options::nonblock()).unwrap_err(),
        IocError::NoData
    );
    let start = Instant::now();
    assert_eq!(
        ioc.recv_dat(recv_link, &Options::new().timeout_us(50_000)).unwrap_err(),
        IocError::Timeout
    );
    assert!(start.elapsed() >= Duration::from_millis(40));

    // Flushing a synchronous transport is a successful no-op.
    ioc.flush_dat(send_link, &Options::new())?;
    ioc.offline_service(srv)?;
    Ok(())
}

/// A blocked bounded receive completes as soon as a payload arrives from
/// another thread.
#[test]
fn recv_wakes_on_send() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, send_link, recv_link) = data_pair(&ioc, "wakeup", None)?;

    let sender_ioc = ioc.clone();
    let sender = std::thread::spawn(move || -> ioc_runtime::Result<()> {
        std::thread::sleep(Duration::from_millis(50));
        sender_ioc.send_dat(send_link, &DatDesc::new(b"late".to_vec()), &Options::new())
    });

    let got = ioc.recv_dat(recv_link, &wait_opts())?;
    assert_eq!(got.payload, b"late");
    sender.join().unwrap()?;
    ioc.offline_service(srv)?;
    Ok(())
}

/// Push delivery: a bound receiver callback sees every payload in the
/// sender's thread; the polling inbox stays empty.
#[test]
fn send_through_receiver_callback() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);

    let (payload_tx, payload_rx) = bounded::<Vec<u8>>(8);
    let receiver: DatCallback = Arc::new(move |_link, desc: &DatDesc| {
        assert_eq!(desc.status, DatStatus::Received);
        let _ = payload_tx.send(desc.payload.clone());
        Ok(())
    });
    let (srv, send_link, recv_link) = data_pair(&ioc, "push", Some(receiver))?;

    ioc.send_dat(send_link, &DatDesc::new(b"pushed".to_vec()), &Options::new())?;
    assert_eq!(payload_rx.recv_timeout(Duration::from_secs(1))?, b"pushed");

    assert_eq!(
        ioc.recv_dat(recv_link, &Options::nonblock()).unwrap_err(),
        IocError::NoData
    );
    ioc.offline_service(srv)?;
    Ok(())
}

/// Zero-data descriptors are rejected before any backend runs.
#[test]
fn zero_data_rejected() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);

    // Even with a receiver callback that would observe delivery, nothing
    // must reach it for an empty payload.
    let (seen_tx, seen_rx) = bounded::<()>(1);
    let receiver: DatCallback = Arc::new(move |_link, _desc: &DatDesc| {
        let _ = seen_tx.send(());
        Ok(())
    });
    let (srv, send_link, _recv_link) = data_pair(&ioc, "zero", Some(receiver))?;

    assert_eq!(
        ioc.send_dat(send_link, &DatDesc::new(Vec::new()), &Options::new())
            .unwrap_err(),
        IocError::ZeroData
    );
    assert!(seen_rx.recv_timeout(Duration::from_millis(100)).is_err());

    ioc.offline_service(srv)?;
    Ok(())
}

/// Flow control: a full peer inbox rejects further sends with BufferFull
/// until the receiver drains it.
#[test]
fn send_backpressure() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, send_link, recv_link) = data_pair(&ioc, "full", None)?;

    let chunk = DatDesc::new(vec![7u8; 32]);
    for _ in 0..defaults::MAX_QUEUED_DATDESC {
        ioc.send_dat(send_link, &chunk, &Options::new())?;
    }
    assert_eq!(
        ioc.send_dat(send_link, &chunk, &Options::new()).unwrap_err(),
        IocError::BufferFull
    );

    ioc.recv_dat(recv_link, &Options::nonblock())?;
    ioc.send_dat(send_link, &chunk, &Options::new())?;

    ioc.offline_service(srv)?;
    Ok(())
}

/// A larger random payload survives the framed inbox byte-for-byte.
#[test]
fn random_payload_roundtrip() -> Result<()> {
    use rand::RngCore;

    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, send_link, recv_link) = data_pair(&ioc, "rand", None)?;

    let mut payload = vec![0u8; 64 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    ioc.send_dat(send_link, &DatDesc::new(payload.clone()), &Options::new())?;
    let got = ioc.recv_dat(recv_link, &wait_opts())?;
    assert_eq!(got.payload, payload);

    ioc.offline_service(srv)?;
    Ok(())
}

/// Role checks on the data facade.
#[test]
fn data_role_validation() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, send_link, recv_link) = data_pair(&ioc, "roles", None)?;

    assert_eq!(
        ioc.recv_dat(send_link, &Options::nonblock()).unwrap_err(),
        IocError::IncompatibleUsage
    );
    assert_eq!(
        ioc.send_dat(recv_link, &DatDesc::new(vec![1]), &Options::new())
            .unwrap_err(),
        IocError::IncompatibleUsage
    );
    assert_eq!(
        ioc.send_dat(LinkId::AUTO, &DatDesc::new(vec![1]), &Options::new())
            .unwrap_err(),
        IocError::NotSupport
    );

    ioc.offline_service(srv)?;
    Ok(())
}

/// A closed peer is reported as LinkBroken on the next send, not
/// proactively.
#[test]
fn broken_peer_on_send() -> Result<()> {
    let ioc = Arc::new(IocRuntime::new()?);
    let (srv, send_link, recv_link) = data_pair(&ioc, "broken", None)?;

    ioc.close_link(recv_link)?;
    assert_eq!(
        ioc.send_dat(send_link, &DatDesc::new(vec![1]), &Options::new())
            .unwrap_err(),
        IocError::LinkBroken
    );

    ioc.offline_service(srv)?;
    Ok(())
}
