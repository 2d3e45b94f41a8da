pub mod expired_token_worker;
