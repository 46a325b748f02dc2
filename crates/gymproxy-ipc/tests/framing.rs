use gymproxy_ipc::{
    IpcError,
    framing::{MAX_FRAME_SIZE, MAX_FRAMES, read_frame, read_message, write_frame, write_message},
};
use tokio::io::{AsyncWriteExt, duplex, sink};

#[tokio::test]
async fn multipart_message_roundtrip() {
    let (mut tx, mut rx) = duplex(256);
    let frames = vec![b"{\"method\":\"reset\"}".to_vec(), vec![1, 2, 3, 4], Vec::new()];
    let expected = frames.clone();

    let write_task = tokio::spawn(async move { write_message(&mut tx, &frames).await });
    let read_frames = read_message(&mut rx).await.expect("read should succeed");

    write_task
        .await
        .expect("join should succeed")
        .expect("write should succeed");
    assert_eq!(read_frames, expected);
}

#[tokio::test]
async fn single_frame_roundtrip() {
    let (mut tx, mut rx) = duplex(128);
    let payload = b"hello-frame".to_vec();

    let write_task = tokio::spawn(async move { write_frame(&mut tx, &payload).await });
    let read_payload = read_frame(&mut rx).await.expect("read should succeed");

    write_task
        .await
        .expect("join should succeed")
        .expect("write should succeed");
    assert_eq!(read_payload, b"hello-frame");
}

#[tokio::test]
async fn reject_oversized_frame() {
    let mut writer = sink();
    let payload = vec![0_u8; (MAX_FRAME_SIZE + 1) as usize];

    let err = write_frame(&mut writer, &payload)
        .await
        .expect_err("oversized frame must fail");

    match err {
        IpcError::FrameTooLarge { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn reject_empty_and_oversized_messages() {
    let mut writer = sink();

    let err = write_message(&mut writer, &[])
        .await
        .expect_err("empty message must fail");
    assert!(matches!(err, IpcError::Encode(_)), "unexpected error: {err}");

    let frames = vec![Vec::new(); MAX_FRAMES as usize + 1];
    let err = write_message(&mut writer, &frames)
        .await
        .expect_err("too many frames must fail");
    assert!(
        matches!(err, IpcError::TooManyFrames { .. }),
        "unexpected error: {err}"
    );

    let frames = vec![b"{}".to_vec(), vec![0_u8; (MAX_FRAME_SIZE + 1) as usize]];
    let err = write_message(&mut writer, &frames)
        .await
        .expect_err("oversized frame inside a message must fail");
    assert!(
        matches!(err, IpcError::FrameTooLarge { .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn reject_frame_count_over_limit_on_read() {
    let (mut tx, mut rx) = duplex(64);
    tx.write_all(&(MAX_FRAMES + 1).to_be_bytes())
        .await
        .expect("header write should succeed");

    let err = read_message(&mut rx)
        .await
        .expect_err("frame count over limit must fail");
    assert!(
        matches!(err, IpcError::TooManyFrames { .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn detect_truncated_frame_payload() {
    let (mut tx, mut rx) = duplex(128);

    tx.write_all(&1_u32.to_be_bytes())
        .await
        .expect("count write should succeed");
    tx.write_all(&8_u32.to_be_bytes())
        .await
        .expect("header write should succeed");
    tx.write_all(b"abc")
        .await
        .expect("partial payload write should succeed");
    drop(tx);

    let err = read_message(&mut rx)
        .await
        .expect_err("truncated frame should fail");

    match err {
        IpcError::Io(io_err) => {
            assert_eq!(io_err.kind(), std::io::ErrorKind::UnexpectedEof);
        }
        other => panic!("unexpected error: {other}"),
    }
}
