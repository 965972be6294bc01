mod support;
mod test_deployment;
mod test_remotes;
mod test_server;
mod test_users;
mod test_webhook;
