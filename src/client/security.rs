//! Reading and writing NT security descriptors

use super::handles::Handle;
use super::Share;
use crate::error::{NtStatus, Result};
use crate::protocol::constants::{nt_transact, SecurityControl, SecurityInformation};
use crate::protocol::messages::security::parse_length_needed;
use crate::protocol::messages::{
    Acl, SecurityDescParams, SecurityDescriptor, Sid, SmbMessage, TransRequest,
};
use tracing::debug;

impl Share {
    /// Query the parts of the descriptor named by `selector`
    ///
    /// A reply asking for a bigger buffer is retried once with the size it names.
    pub async fn get_security_descriptor(
        &self,
        handle: &Handle,
        selector: SecurityInformation,
    ) -> Result<SecurityDescriptor> {
        let fid = self.usable_fid(handle).await?;
        let params = SecurityDescParams {
            fid,
            security_information: selector,
        }
        .serialize()?;

        let mut max_data = self.transmit_max();
        let mut retried = false;
        loop {
            let request =
                TransRequest::new(nt_transact::QUERY_SECURITY_DESC, params.clone(), Vec::new(), max_data);
            let reply = self.nt_transact(request).await?;
            if reply.status == NtStatus::BufferTooSmall && !retried {
                let needed = parse_length_needed(&reply.params)?;
                if needed > max_data {
                    debug!("security descriptor needs {} bytes, retrying", needed);
                    max_data = needed;
                    retried = true;
                    continue;
                }
            }
            let reply = reply.check("query security descriptor")?;
            return SecurityDescriptor::parse(&reply.data);
        }
    }

    /// Replace the descriptor parts that are given
    pub async fn set_security_descriptor(
        &self,
        handle: &Handle,
        selector: SecurityInformation,
        owner: Option<Sid>,
        group: Option<Sid>,
        sacl: Option<Acl>,
        dacl: Option<Acl>,
    ) -> Result<()> {
        let fid = self.usable_fid(handle).await?;
        let descriptor = SecurityDescriptor {
            control: SecurityControl::default(),
            owner,
            group,
            sacl,
            dacl,
        };
        let params = SecurityDescParams {
            fid,
            security_information: selector,
        }
        .serialize()?;
        let request = TransRequest::new(
            nt_transact::SET_SECURITY_DESC,
            params,
            descriptor.serialize()?,
            0,
        );
        self.nt_transact(request)
            .await?
            .check("set security descriptor")?;
        handle.node().invalidate_attrs();
        Ok(())
    }
}
