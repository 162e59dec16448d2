use async_trait::async_trait;
use log::error;
use tokio::sync::{mpsc, watch};

const ACTOR_CHANNEL_SIZE: usize = 8;

/// A unit of state owned by a single message-consuming loop.
///
/// The loop is the only code that touches the actor's state, so `receive`
/// can mutate it freely without locks. `receive` is async: an actor whose
/// mailbox doubles as a work queue may suspend mid-message (e.g. on a retry
/// delay) and later messages wait their turn.
///
/// An actor stops when `receive` asks for it, when `receive` fails, or when
/// the mailbox is drained after every handle has been dropped or started
/// waiting for the stop. The loop itself keeps no sender, so the last case
/// is the natural shutdown path for actors that never message themselves.
#[async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options: Send + 'static;
    type Error: std::fmt::Display + From<mpsc::error::SendError<Self::Message>> + Send;

    fn new(options: Self::Options) -> Self;
    fn start(&mut self) -> Result<(), Self::Error>;
    async fn receive(&mut self, message: Self::Message) -> Result<ActorAction, Self::Error>;
    async fn stop(self) -> Result<(), Self::Error>;
}

pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> std::fmt::Debug for ActorHandle<T>
where
    T: Actor,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("sender", &self.sender)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn new(options: T::Options) -> Self {
        Self::with_capacity(options, ACTOR_CHANNEL_SIZE)
    }

    /// Starts the actor loop on the current runtime with a mailbox of the
    /// given capacity. `send` applies backpressure once the mailbox is full.
    pub fn with_capacity(options: T::Options, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity);
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let mut actor = T::new(options);
        tokio::spawn(async move {
            if let Err(e) = actor.start() {
                error!("failed to start actor: {e}");
            } else {
                while let Some(message) = rx.recv().await {
                    match actor.receive(message).await {
                        Ok(ActorAction::Continue) => {}
                        Ok(ActorAction::Stop) => break,
                        Err(e) => {
                            error!("actor terminated with error: {e}");
                            break;
                        }
                    }
                }
            }
            // The actor releases owned resources in `stop` even when the
            // loop exits on an error.
            if let Err(e) = actor.stop().await {
                error!("failed to stop actor: {e}");
            }
            let _ = stopped_tx.send(true);
        });
        Self {
            sender: tx,
            stopped: stopped_rx,
        }
    }

    pub async fn send(&self, message: T::Message) -> Result<(), T::Error> {
        self.sender.send(message).await.map_err(T::Error::from)
    }

    /// Gives up this handle's sender and waits for the actor to stop.
    ///
    /// An actor whose mailbox is its work queue keeps running until every
    /// sender is gone and the queue is drained, so waiting must relinquish
    /// the sender first. We ignore the receiver error since the stop sender
    /// must have been dropped in this case, which means the actor has
    /// stopped.
    pub async fn wait_for_stop(self) {
        let Self {
            sender,
            mut stopped,
        } = self;
        drop(sender);
        let _ = stopped.wait_for(|x| *x).await;
    }
}
