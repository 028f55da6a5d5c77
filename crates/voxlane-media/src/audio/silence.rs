use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::{opus_frame_duration, EncodedAudio, OPUS_SILENCE_FRAME};

pub(super) fn spawn(tx: mpsc::Sender<EncodedAudio>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(opus_frame_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let frame = EncodedAudio {
                data: OPUS_SILENCE_FRAME.to_vec(),
                duration: opus_frame_duration(),
            };
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    })
}
