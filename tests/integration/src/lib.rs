// Licensed under the Apache-2.0 license

#[cfg(test)]
mod platform;
#[cfg(test)]
mod test_mailbox_faults;
#[cfg(test)]
mod test_recovery;
#[cfg(test)]
mod test_update_flow;
