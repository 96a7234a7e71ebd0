//! Closing a channel on chain.
//!
//! ```text
//! closer                                   peer
//!   Open -> WaitingToClose
//!   vpc close (own state) ----------------> VpcClosing event
//!   InConflict -> Settled -> VpcClosing     InConflict
//!                                           vpc close (latest state)
//!                                           Settled -> VpcClosing
//!   VpcClosed event <---------------------> VpcClosed event
//!   execute -----------------------------> MSC Closed event
//!   Closed                                  Closed
//! ```
//!
//! The contract keeps the higher version of the two submitted states, so a
//! closer submitting an old state is overruled by the peer's latest one.

use dst_node_chain::VpcClosed;
use dst_node_channel::ChannelStatus;
use dst_node_core::{Role, VpcStateSigned};

use crate::error::{NodeError, Result};
use crate::payment::PaymentChannel;

impl PaymentChannel {
    fn latest_state(&self) -> Result<VpcStateSigned> {
        self.instance
            .current_vpc_state()
            .cloned()
            .ok_or_else(|| NodeError::InvalidState("no vpc state to close with".into()))
    }

    /// Any countersigned state of this channel may be submitted, older
    /// ones included.
    fn check_closing_state(&self, state: &VpcStateSigned) -> Result<()> {
        if state.state.id != self.session_id()?.vpc_id()? {
            return Err(NodeError::InvalidState("state of another channel".into()));
        }
        let (sender, receiver) = self.parties()?;
        state.require_signatures(&sender, &receiver)?;
        Ok(())
    }

    /// Close with the latest countersigned state and wait until the VPC
    /// is final.
    pub async fn close(&mut self) -> Result<VpcClosed> {
        let state = self.latest_state()?;
        self.close_with(state).await
    }

    /// Close with a chosen countersigned state.
    ///
    /// The peer answers with its own latest state; whichever has the
    /// higher version is final.
    pub async fn close_with(&mut self, state: VpcStateSigned) -> Result<VpcClosed> {
        self.check_closing_state(&state)?;
        self.advance(&[ChannelStatus::WaitingToClose])?;
        self.instance.set_role_closing(Role::Sender);
        tracing::info!(parent: &self.span, version = state.state.version, "closing vpc");

        self.submit_close(&state).await?;
        let timeout = self.event_timeout;
        let closing = self.chain.events()?.vpc_closing.recv_timeout(timeout).await?;
        tracing::debug!(parent: &self.span, id = %closing.id, "vpc closing");
        self.advance(&[
            ChannelStatus::InConflict,
            ChannelStatus::Settled,
            ChannelStatus::VpcClosing,
        ])?;
        self.await_vpc_closed().await
    }

    /// Answer a close started by the peer with the latest state.
    ///
    /// The VPC is only final once both parties submitted, so the answer is
    /// sent even when the peer already used the latest state.
    pub async fn respond_close(&mut self) -> Result<VpcClosed> {
        let timeout = self.event_timeout;
        let closing = self.chain.events()?.vpc_closing.recv_timeout(timeout).await?;
        self.advance(&[ChannelStatus::InConflict])?;
        self.instance.set_role_closing(Role::Receiver);

        let vpc_id = self.session_id()?.vpc_id()?;
        if closing.id != vpc_id {
            return Err(NodeError::InvalidState(format!(
                "closing event for vpc {}",
                closing.id
            )));
        }
        let state = self.latest_state()?;
        tracing::info!(
            parent: &self.span,
            latest = state.state.version,
            mode = ?self.instance.closing_mode(),
            "peer is closing vpc"
        );
        self.submit_close(&state).await?;
        self.advance(&[ChannelStatus::Settled, ChannelStatus::VpcClosing])?;
        self.await_vpc_closed().await
    }

    async fn submit_close(&mut self, state: &VpcStateSigned) -> Result<()> {
        let sid = self.session_id()?.clone();
        self.party.arm(self.chain.owner_mut());
        self.chain.vpc_close(&sid, state).await?;
        Ok(())
    }

    async fn await_vpc_closed(&mut self) -> Result<VpcClosed> {
        let timeout = self.event_timeout;
        let closed = self.chain.events()?.vpc_closed.recv_timeout(timeout).await?;
        self.advance(&[ChannelStatus::VpcClosed])?;
        tracing::info!(
            parent: &self.span,
            cash_sender = closed.cash_sender,
            cash_receiver = closed.cash_receiver,
            "vpc closed"
        );
        Ok(closed)
    }

    /// Pay out both parties after the VPC closed.
    pub async fn execute(&mut self) -> Result<()> {
        if self.instance.status() != ChannelStatus::VpcClosed {
            return Err(NodeError::InvalidState(format!(
                "execute in status {}",
                self.instance.status()
            )));
        }
        let (sender, receiver) = self.parties()?;
        self.party.arm(self.chain.owner_mut());
        self.chain.execute(sender, receiver).await?;
        self.await_closed().await
    }

    /// Wait until the settlement contract paid out.
    pub async fn await_closed(&mut self) -> Result<()> {
        let timeout = self.event_timeout;
        self.chain.events()?.ms_closed.recv_timeout(timeout).await?;
        self.advance(&[ChannelStatus::Closed])?;
        tracing::info!(parent: &self.span, "channel closed");
        Ok(())
    }
}
