pub mod amqp10;
